#[test]
fn askweb_version_contract() {
    let bin = assert_cmd::cargo::cargo_bin!("askweb");
    let out = std::process::Command::new(bin)
        .args(["version"])
        .env_remove("ASKWEB_ENV_FILE")
        .output()
        .expect("run askweb version");

    assert!(out.status.success(), "askweb version failed");
    let s = String::from_utf8_lossy(&out.stdout);
    let v: serde_json::Value = serde_json::from_str(&s).expect("parse version json");

    assert_eq!(v["schema_version"].as_u64(), Some(1));
    assert_eq!(v["kind"].as_str(), Some("version"));
    assert_eq!(v["name"].as_str(), Some("askweb"));
    assert!(!v["version"].as_str().unwrap_or("").is_empty());
}

#[test]
fn askweb_version_text_output() {
    let mut cmd = assert_cmd::Command::new(assert_cmd::cargo::cargo_bin!("askweb"));
    cmd.args(["version", "--output", "text"])
        .env_remove("ASKWEB_ENV_FILE")
        .assert()
        .success()
        .stdout(predicates::str::starts_with("askweb "));
}
