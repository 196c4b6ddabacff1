use std::process::Command;

fn contains_bytes(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

#[test]
fn help_and_version() {
    for (binary, name) in [
        (env!("CARGO_BIN_EXE_ptp-dump"), "ptp-dump"),
        (env!("CARGO_BIN_EXE_ptp-extts"), "ptp-extts"),
    ] {
        let result = Command::new(binary).arg("--help").output().unwrap();
        assert_eq!(result.status.code(), Some(0));
        assert!(contains_bytes(&result.stdout, b"usage:"));
        assert!(contains_bytes(&result.stdout, name.as_bytes()));

        let result = Command::new(binary).arg("-v").output().unwrap();
        assert_eq!(result.status.code(), Some(0));
        assert!(contains_bytes(
            &result.stderr,
            format!("{name} {}", env!("CARGO_PKG_VERSION")).as_bytes()
        ));
    }
}

#[test]
fn invalid_arguments() {
    let result = Command::new(env!("CARGO_BIN_EXE_ptp-dump"))
        .args(["--format", "xml"])
        .output()
        .unwrap();
    assert_eq!(result.status.code(), Some(1));
    assert!(contains_bytes(&result.stderr, b"invalid format option provided: xml"));

    let result = Command::new(env!("CARGO_BIN_EXE_ptp-extts"))
        .args(["-e", "sideways"])
        .output()
        .unwrap();
    assert_eq!(result.status.code(), Some(1));
    assert!(contains_bytes(&result.stderr, b"invalid edge provided: sideways"));

    let result = Command::new(env!("CARGO_BIN_EXE_ptp-extts"))
        .args(["--bogus"])
        .output()
        .unwrap();
    assert_eq!(result.status.code(), Some(1));
    assert!(contains_bytes(&result.stderr, b"invalid option provided: --bogus"));
}

#[test]
fn invalid_config() {
    let result = Command::new(env!("CARGO_BIN_EXE_ptp-dump"))
        .args([
            "-c",
            &format!(
                "{}/testdata/config/invalid.toml",
                env!("CARGO_MANIFEST_DIR")
            ),
        ])
        .output()
        .unwrap();
    assert_eq!(result.status.code(), Some(1));
    assert!(contains_bytes(
        &result.stderr,
        b"unknown field `does-not-exist`"
    ));
}

#[test]
fn missing_device() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("ptp.toml");
    // no machine has this many PTP clocks
    std::fs::write(&config, "[device]\nindex = 4000000\n").unwrap();

    let result = Command::new(env!("CARGO_BIN_EXE_ptp-dump"))
        .args(["-c", config.to_str().unwrap()])
        .output()
        .unwrap();
    assert_eq!(result.status.code(), Some(1));
    assert!(contains_bytes(&result.stderr, b"failed to open PTP device"));
}
