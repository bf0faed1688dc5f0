use std::process::Command;

// The environment fingerprint embedded in every segment records the exact
// compiler that produced the build; capture `rustc --version` here.
fn main() {
    let rustc = std::env::var("RUSTC").unwrap_or_else(|_| "rustc".to_string());
    let version = Command::new(rustc)
        .arg("--version")
        .output()
        .ok()
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    println!("cargo:rustc-env=STATEBASE_RUSTC_VERSION={}", version);
    println!("cargo:rerun-if-changed=build.rs");
}
