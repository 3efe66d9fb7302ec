use std::time::Duration;

use courier::config::Config;
use courier::http::request::DEFAULT_USER_AGENT;

#[test]
fn test_config_defaults() {
    let cfg = Config::default();
    assert_eq!(cfg.worker_threads, 1);
    assert_eq!(cfg.dispose_interval(), Duration::from_secs(1));
    assert_eq!(cfg.request.timeout_secs, 60);
    assert_eq!(cfg.request.max_redirects, 10);
    assert!(cfg.request.follow_redirects);
    assert!(!cfg.request.verify_peer);
    assert_eq!(cfg.request.user_agent, DEFAULT_USER_AGENT);
}

#[test]
fn test_config_partial_yaml_keeps_defaults() {
    let cfg = Config::from_yaml(
        "worker_threads: 4\nrequest:\n  max_redirects: 2\n  gzip: false\n",
    )
    .unwrap();

    assert_eq!(cfg.worker_threads, 4);
    assert_eq!(cfg.request.max_redirects, 2);
    assert!(!cfg.request.gzip);
    assert!(cfg.request.keep_alive);
    assert_eq!(cfg.dispose_interval_ms, 1000);
}

#[test]
fn test_config_rejects_bad_yaml() {
    assert!(Config::from_yaml("worker_threads: many").is_err());
}

#[test]
fn test_config_builder_applies_defaults() {
    let mut cfg = Config::default();
    cfg.request.timeout_secs = 7;
    cfg.request.throw_on_error = true;

    let request = cfg.request.to_request();
    assert_eq!(request.timeout, Duration::from_secs(7));
    assert!(request.throw_on_error);
    assert_eq!(request.headers.get("User-Agent"), Some(DEFAULT_USER_AGENT));
}

#[test]
fn test_config_from_file_and_env() {
    let path = std::env::temp_dir().join(format!("courier-config-{}.yaml", std::process::id()));
    std::fs::write(&path, "request:\n  timeout_secs: 15\n  user_agent: from-file\n").unwrap();

    unsafe {
        std::env::set_var("COURIER_CONFIG", &path);
        std::env::remove_var("COURIER_TIMEOUT_SECS");
        std::env::remove_var("COURIER_USER_AGENT");
        std::env::set_var("COURIER_WORKER_THREADS", "3");
    }
    let cfg = Config::load().unwrap();
    assert_eq!(cfg.request.timeout_secs, 15);
    assert_eq!(cfg.request.user_agent, "from-file");
    assert_eq!(cfg.worker_threads, 3);

    unsafe {
        std::env::set_var("COURIER_TIMEOUT_SECS", "30");
        std::env::set_var("COURIER_USER_AGENT", "from-env");
    }
    let cfg = Config::load().unwrap();
    assert_eq!(cfg.request.timeout_secs, 30);
    assert_eq!(cfg.request.user_agent, "from-env");

    unsafe {
        std::env::set_var("COURIER_TIMEOUT_SECS", "soon");
    }
    assert!(Config::load().is_err());

    unsafe {
        std::env::remove_var("COURIER_CONFIG");
        std::env::remove_var("COURIER_TIMEOUT_SECS");
        std::env::remove_var("COURIER_USER_AGENT");
        std::env::remove_var("COURIER_WORKER_THREADS");
    }
    let _ = std::fs::remove_file(&path);
}
