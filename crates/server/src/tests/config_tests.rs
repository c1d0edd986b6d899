use super::*;

fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn app_prefixed_env_wins_over_bare_names() {
    let mut settings = Settings::default();
    apply_env(
        &mut settings,
        &env(&[
            ("SERVER_BIND", "0.0.0.0:9000"),
            ("APP__BIND_ADDR", "127.0.0.1:9100"),
            ("STAGE_DELAY_MS", "25"),
            ("APP__IPFS_GATEWAY", "https://gateway.example/ipfs/"),
            ("APP__BLOCKED_TERMS", " Gore, ,violence "),
        ]),
    );

    assert_eq!(settings.bind_addr, "127.0.0.1:9100");
    assert_eq!(settings.stage_delay, Duration::from_millis(25));
    assert_eq!(settings.ipfs_gateway, "https://gateway.example/ipfs");
    assert_eq!(settings.blocked_terms, vec!["gore", "violence"]);
}

#[test]
fn job_retention_comes_from_env() {
    let mut settings = Settings::default();
    assert_eq!(settings.job_retention, DEFAULT_JOB_RETENTION);

    apply_env(&mut settings, &env(&[("JOB_RETENTION_SECS", "30")]));
    assert_eq!(settings.job_retention, Duration::from_secs(30));

    apply_env(&mut settings, &env(&[("APP__JOB_RETENTION_SECS", "soon")]));
    assert_eq!(settings.job_retention, Duration::from_secs(30));
}

#[test]
fn non_numeric_stage_delay_keeps_default() {
    let mut settings = Settings::default();
    apply_env(&mut settings, &env(&[("APP__STAGE_DELAY_MS", "fast")]));
    assert_eq!(settings.stage_delay, Settings::default().stage_delay);
}

#[test]
fn term_matching_ignores_case() {
    let settings = Settings {
        blocked_terms: vec!["gore".to_string()],
        failing_terms: vec!["glitch".to_string()],
        ..Settings::default()
    };
    assert!(settings.is_blocked("A GORE scene"));
    assert!(!settings.is_blocked("a garden"));
    assert!(settings.should_fail("Glitch art"));
    assert!(!settings.should_fail("a garden"));
}

#[test]
fn settings_file_is_applied() {
    let dir = std::env::temp_dir().join(format!("mint-server-config-{}", std::process::id()));
    fs::create_dir_all(&dir).expect("create temp dir");
    let path = dir.join("mint-server.toml");
    fs::write(
        &path,
        r#"
bind_addr = "0.0.0.0:8080"
stage_delay_ms = 10
failing_terms = ["Glitch"]
"#,
    )
    .expect("write settings file");

    let mut settings = Settings::default();
    apply_file(&mut settings, &path);

    assert_eq!(settings.bind_addr, "0.0.0.0:8080");
    assert_eq!(settings.stage_delay, Duration::from_millis(10));
    assert_eq!(settings.failing_terms, vec!["glitch"]);
    assert!(settings.blocked_terms.is_empty());

    fs::remove_dir_all(&dir).expect("cleanup");
}

#[test]
fn unreadable_settings_file_keeps_defaults() {
    let dir = std::env::temp_dir().join(format!("mint-server-bad-config-{}", std::process::id()));
    fs::create_dir_all(&dir).expect("create temp dir");
    let path = dir.join("mint-server.toml");
    fs::write(&path, "stage_delay_ms = \"soon\"").expect("write settings file");

    let mut settings = Settings::default();
    apply_file(&mut settings, &path);
    assert_eq!(settings.stage_delay, Settings::default().stage_delay);

    fs::remove_dir_all(&dir).expect("cleanup");
}
