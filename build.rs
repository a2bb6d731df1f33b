use std::{fs, path::Path, process::Command, time::SystemTime};

fn main() {
    let now = SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    println!("cargo:rustc-env=BUILD_TIME={}", now);

    println!("cargo:rerun-if-changed=.git/HEAD");
    if Path::new(".git/refs/heads").exists() {
        println!("cargo:rerun-if-changed=.git/refs/heads");
    }

    let git_info = get_git_info();

    println!("cargo:rustc-env=GIT_BRANCH={}", git_info.branch);
    println!("cargo:rustc-env=GIT_COMMIT={}", git_info.commit);
    println!("cargo:rustc-env=GIT_COMMIT_TIME={}", git_info.commit_time);
}

struct GitInfo {
    branch: String,
    commit: String,
    commit_time: u64,
}

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn get_git_info() -> GitInfo {
    let mut info = GitInfo {
        branch: git(&["rev-parse", "--abbrev-ref", "HEAD"]).unwrap_or_else(|| "unknown".into()),
        commit: git(&["rev-parse", "HEAD"]).unwrap_or_else(|| "unknown".into()),
        commit_time: git(&["show", "-s", "--format=%ct", "HEAD"])
            .and_then(|s| s.parse::<u64>().ok())
            .map(|t| t * 1000)
            .unwrap_or(0),
    };

    // No git binary: read HEAD by hand.
    if info.commit == "unknown" || info.branch == "unknown" {
        if let Ok(head) = fs::read_to_string(".git/HEAD") {
            if let Some(ref_path) = head.strip_prefix("ref: ") {
                let ref_path = ref_path.trim();
                info.branch = ref_path.rsplit('/').next().unwrap_or("unknown").to_string();
                if let Ok(commit) = fs::read_to_string(format!(".git/{}", ref_path)) {
                    info.commit = commit.trim().to_string();
                }
            } else {
                info.commit = head.trim().to_string();
            }
        }
    }

    if info.commit_time == 0 && info.commit != "unknown" {
        let modified = fs::metadata(format!(".git/refs/heads/{}", info.branch))
            .and_then(|m| m.modified())
            .ok()
            .and_then(|m| m.duration_since(SystemTime::UNIX_EPOCH).ok());
        if let Some(modified) = modified {
            info.commit_time = modified.as_millis() as u64;
        }
    }

    info
}
