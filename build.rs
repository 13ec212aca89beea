use std::process::Command;

fn git_revision() -> String {
    let revision = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string());

    match revision {
        Some(hash) => {
            let dirty = Command::new("git")
                .args(["diff", "--quiet"])
                .status()
                .map(|s| !s.success())
                .unwrap_or(false);
            if dirty { format!("{hash}-dirty") } else { hash }
        }
        None => "unknown".to_string(),
    }
}

fn main() {
    println!("cargo:rustc-env=GIT_HASH={}", git_revision());
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads");
}
