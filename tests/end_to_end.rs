use std::{
    fs,
    net::{SocketAddr, TcpStream},
    path::Path,
    process::Command,
    thread::sleep,
    time::Duration,
};

use assert_cmd::{assert::OutputAssertExt, cargo::CommandCargoExt};

fn cmd(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin(env!("CARGO_PKG_NAME")).unwrap();
    cmd.arg("--dir").arg(dir);
    cmd
}

#[tokio::test]
async fn health_and_stats() {
    let dir = tempfile::tempdir().unwrap();
    let dir = dir.path();

    let footbot::conf::Conf { addr, port, .. } = setup_conf(dir, 7311);
    let token = cmd(dir).args(["jwt", "e2e-admin", "60"]).output().unwrap();
    assert!(token.status.success());
    let token = String::from_utf8(token.stdout).unwrap();
    let token = token.trim();

    let sock_addr: SocketAddr = format!("{addr}:{port}").parse().unwrap();
    assert!(server_is_not_listening(&sock_addr));
    let mut server = cmd(dir).arg("server").spawn().unwrap();
    assert!(server_is_listening(&sock_addr));

    let client = reqwest::Client::new();
    let health = client
        .get(format!("http://{addr}:{port}/health"))
        .send()
        .await;
    let stats = client
        .get(format!("http://{addr}:{port}/stats"))
        .bearer_auth(token)
        .send()
        .await;
    let anonymous = client
        .get(format!("http://{addr}:{port}/stats"))
        .send()
        .await;

    // XXX Stop the server BEFORE asserting, because if any assert fails
    //     we will not get a chance to clean-up.
    server.kill().unwrap();

    let health = health.unwrap();
    assert!(health.status().is_success());
    assert_eq!(health.text().await.unwrap(), "OK");

    let stats = stats.unwrap();
    assert!(stats.status().is_success());
    let stats: serde_json::Value = stats.json().await.unwrap();
    assert_eq!(stats["total_users"], 0);

    assert_eq!(anonymous.unwrap().status(), reqwest::StatusCode::UNAUTHORIZED);
}

#[test]
fn plan_for_unknown_user_fails() {
    let dir = tempfile::tempdir().unwrap();
    let dir = dir.path();
    setup_conf(dir, 7312);
    cmd(dir)
        .args(["plan", "12345", "premium", "--days", "30"])
        .assert()
        .failure();
    cmd(dir).args(["plan", "12345", "gold"]).assert().failure();
    cmd(dir).args(["deactivate", "12345"]).assert().failure();
}

#[test]
fn stats_on_empty_store() {
    let dir = tempfile::tempdir().unwrap();
    let dir = dir.path();
    setup_conf(dir, 7313);
    let output = cmd(dir).arg("stats").output().unwrap();
    assert!(output.status.success());
    let stats: serde_json::Value =
        serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(stats["premium_users"], 0);
    assert_eq!(stats["queries_today"], 0);
}

fn setup_conf(workdir: &Path, port: u16) -> footbot::conf::Conf {
    let conf = footbot::conf::Conf {
        log_level: tracing::Level::INFO,
        addr: "127.0.0.1".parse().unwrap(),
        port,
        jwt: footbot::conf::ConfJwt {
            secret: "fake-secret".to_string(),
            audience: "fake-audience".to_string(),
            issuer: "fake-issuer".to_string(),
        },
        tls: None,
        ..footbot::conf::Conf::default()
    };
    let conf_str = toml::to_string(&conf).unwrap();
    let conf_dir = workdir.join("conf");
    fs::create_dir_all(&conf_dir).unwrap();
    fs::write(conf_dir.join("conf.toml"), &conf_str).unwrap();
    conf
}

fn server_is_not_listening(addr: &SocketAddr) -> bool {
    TcpStream::connect(addr).is_err()
}

fn server_is_listening(addr: &SocketAddr) -> bool {
    let interval = Duration::from_secs_f32(0.25);
    let attempts = 20;
    retry_until_true(|| TcpStream::connect(addr).is_ok(), interval, attempts)
}

fn retry_until_true<F: Fn() -> bool>(
    f: F,
    interval: Duration,
    mut attempts: usize,
) -> bool {
    while attempts > 0 {
        if f() {
            return true;
        } else {
            attempts -= 1;
            sleep(interval);
        }
    }
    false
}
