use std::env;
use std::process::Command;

fn main() {
    let version = env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "unknown".to_string());

    let commit = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| {
            String::from_utf8_lossy(&output.stdout)
                .trim()
                .chars()
                .take(8)
                .collect::<String>()
        })
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=COSIGNER_VERSION={}", version);
    println!("cargo:rustc-env=COSIGNER_COMMIT={}", commit);

    println!("cargo:rerun-if-changed=Cargo.toml");
    println!("cargo:rerun-if-changed=build.rs");
}
