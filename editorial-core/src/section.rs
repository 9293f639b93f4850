closed_set! {
    /// The role a registered account acts in.
    pub enum Section {
        Admin => "admin",
        Author => "author",
        Reviewer => "reviewer",
        AssociateEditor => "associate-editor",
        EditorInChief => "editor-in-chief",
        /// Editorial production manager: similarity, pagination, grammar.
        Epm => "epm",
        Formatter => "formatter",
        Proofreader => "proofreader",
        ReadyArticle => "ready-article",
    }
}
