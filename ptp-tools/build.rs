use std::process::Command;

fn main() {
    let dirty = Command::new("git")
        .args(["diff-index", "--quiet", "HEAD", "--"])
        .status()
        .is_ok_and(|status| !status.success());

    // explicit variables win, then CI, then the repository itself
    let rev = std::env::var("PTP_TOOLS_GIT_REV")
        .ok()
        .or_else(|| std::env::var("GITHUB_SHA").ok())
        .or_else(|| {
            let rev = output("git", &["rev-parse", "HEAD"])?;
            Some(if dirty { format!("{rev}-dirty") } else { rev })
        });

    let date = std::env::var("PTP_TOOLS_GIT_DATE").ok().or_else(|| {
        let rev = rev.as_deref()?;
        if dirty {
            output("date", &["-u", "+%Y-%m-%d"])
        } else {
            output(
                "git",
                &["show", "-s", "--date=format:%Y-%m-%d", "--format=%cd", rev, "--"],
            )
        }
    });

    println!("cargo:rustc-env=PTP_TOOLS_GIT_REV={}", rev.as_deref().unwrap_or("-"));
    println!("cargo:rustc-env=PTP_TOOLS_GIT_DATE={}", date.as_deref().unwrap_or("-"));
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-env-changed=PTP_TOOLS_GIT_REV");
    println!("cargo:rerun-if-env-changed=PTP_TOOLS_GIT_DATE");
}

/// Trimmed stdout of a command that ran successfully.
fn output(cmd: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(cmd).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }

    let out = String::from_utf8(output.stdout).ok()?;
    let out = out.trim();
    (!out.is_empty()).then(|| out.to_owned())
}
