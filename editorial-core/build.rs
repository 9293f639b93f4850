fn main() {
    built::write_built_file().expect("Failed to acquire build-time information");

    // Pass through EDITORIAL_GIT_HASH from the packaging environment
    println!("cargo:rerun-if-env-changed=EDITORIAL_GIT_HASH");
    if let Ok(hash) = std::env::var("EDITORIAL_GIT_HASH") {
        println!("cargo:rustc-env=EDITORIAL_GIT_HASH={}", hash);
    }
}
