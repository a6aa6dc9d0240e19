use std::process::Command;

/// Records the compiler version so the agent can report it in the
/// `register` payload as `runtime_version`.
fn main() {
    let version = Command::new("rustc")
        .arg("--version")
        .output()
        .ok()
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=AIVORY_RUSTC_VERSION={version}");
}
