//! Integration tests for shellcache

mod fixture {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use std::collections::HashMap;
    use std::io::{BufRead, BufReader, Write};
    use std::net::{TcpListener, TcpStream};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use tempfile::TempDir;

    #[derive(Default)]
    struct ServerState {
        online: AtomicBool,
        files: Mutex<HashMap<String, String>>,
        hits: Mutex<Vec<String>>,
    }

    /// Minimal HTTP/1.1 origin; offline mode drops connections unanswered
    pub struct Origin {
        pub url: String,
        state: Arc<ServerState>,
    }

    impl Origin {
        pub fn start() -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let url = format!("http://{}", listener.local_addr().unwrap());
            let state = Arc::new(ServerState::default());
            state.online.store(true, Ordering::SeqCst);

            let shared = state.clone();
            thread::spawn(move || {
                for stream in listener.incoming().flatten() {
                    handle(stream, &shared);
                }
            });

            Self { url, state }
        }

        pub fn serve(&self, path: &str, body: &str) -> &Self {
            self.state
                .files
                .lock()
                .unwrap()
                .insert(path.to_string(), body.to_string());
            self
        }

        pub fn set_online(&self, online: bool) {
            self.state.online.store(online, Ordering::SeqCst);
        }

        pub fn hits(&self, path: &str) -> usize {
            self.state
                .hits
                .lock()
                .unwrap()
                .iter()
                .filter(|hit| *hit == path)
                .count()
        }
    }

    fn handle(mut stream: TcpStream, state: &ServerState) {
        let Ok(clone) = stream.try_clone() else {
            return;
        };
        let mut reader = BufReader::new(clone);

        let mut request_line = String::new();
        if reader.read_line(&mut request_line).is_err() {
            return;
        }
        loop {
            let mut header = String::new();
            match reader.read_line(&mut header) {
                Ok(0) | Err(_) => break,
                Ok(_) if header == "\r\n" => break,
                Ok(_) => {}
            }
        }

        if !state.online.load(Ordering::SeqCst) {
            return;
        }

        let target = request_line.split_whitespace().nth(1).unwrap_or("/");
        let path = target.split('?').next().unwrap_or(target);
        state.hits.lock().unwrap().push(target.to_string());

        let file = state.files.lock().unwrap().get(path).cloned();
        let (status, body) = match file {
            Some(body) => ("200 OK", body),
            None => ("404 Not Found", "not found".to_string()),
        };
        let _ = write!(
            stream,
            "HTTP/1.1 {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
    }

    /// A deployment directory with manifest, config and cache storage
    pub struct App {
        pub dir: TempDir,
        pub origin: Origin,
    }

    impl App {
        pub fn new(manifest: &str) -> Self {
            let origin = Origin::start();
            origin
                .serve("/", "<root>")
                .serve("/index.html", "<html>")
                .serve("/main.dart.js", "main()")
                .serve("/assets/logo.png", "png");

            let app = Self {
                dir: TempDir::new().unwrap(),
                origin,
            };
            app.write_manifest(manifest);

            let config = format!(
                "[agent]\norigin = '{}'\nmanifest = '{}'\ncore = [\"index.html\", \"main.dart.js\"]\n\n[storage]\ndir = '{}'\n",
                app.origin.url,
                app.manifest_path().display(),
                app.storage_dir().display()
            );
            std::fs::write(app.config_path(), config).unwrap();
            app
        }

        pub fn write_manifest(&self, manifest: &str) {
            std::fs::write(self.manifest_path(), manifest).unwrap();
        }

        pub fn manifest_path(&self) -> PathBuf {
            self.dir.path().join("resources.json")
        }

        pub fn config_path(&self) -> PathBuf {
            self.dir.path().join("config.toml")
        }

        pub fn storage_dir(&self) -> PathBuf {
            self.dir.path().join("caches")
        }

        pub fn cmd(&self) -> Command {
            let mut cmd = shellcache();
            cmd.arg("--config").arg(self.config_path());
            cmd
        }

        pub fn status_json(&self) -> serde_json::Value {
            let output = self.cmd().args(["status", "--format", "json"]).output().unwrap();
            assert!(output.status.success());
            serde_json::from_slice(&output.stdout).unwrap()
        }

        pub fn read(&self, relative: impl AsRef<Path>) -> String {
            std::fs::read_to_string(self.storage_dir().join(relative)).unwrap()
        }
    }

    pub fn shellcache() -> Command {
        cargo_bin_cmd!("shellcache")
    }

    pub const MANIFEST_V1: &str = r#"{
        "/": "r0",
        "index.html": "h1",
        "main.dart.js": "h2",
        "assets/logo.png": "h3"
    }"#;

    pub const MANIFEST_V2: &str = r#"{
        "/": "r0",
        "index.html": "h1",
        "main.dart.js": "h9",
        "assets/logo.png": "h3"
    }"#;
}

mod cli_tests {
    use super::fixture::shellcache;
    use predicates::prelude::*;
    use tempfile::TempDir;

    #[test]
    fn help_displays() {
        shellcache()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("offline asset caching agent"));
    }

    #[test]
    fn version_displays() {
        shellcache()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("shellcache"));
    }

    #[test]
    fn config_path_honors_env() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        shellcache()
            .env("SHELLCACHE_CONFIG", &path)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("custom.toml"));
    }

    #[test]
    fn config_init_then_show() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        shellcache()
            .arg("--config")
            .arg(&path)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration initialized"));
        assert!(path.exists());

        shellcache()
            .arg("--config")
            .arg(&path)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[agent]").and(predicate::str::contains("main.dart.js")));
    }

    #[test]
    fn invalid_config_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[agent]\norigin = 'ftp://example.com'\n").unwrap();

        shellcache()
            .arg("--config")
            .arg(&path)
            .arg("status")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }

    #[test]
    fn missing_manifest_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            format!(
                "[agent]\nmanifest = '{}'\n",
                dir.path().join("missing.json").display()
            ),
        )
        .unwrap();

        shellcache()
            .arg("--config")
            .arg(&path)
            .arg("status")
            .assert()
            .failure()
            .stderr(predicate::str::contains("resource manifest"));
    }
}

mod lifecycle_tests {
    use super::fixture::{App, MANIFEST_V1, MANIFEST_V2};
    use predicates::prelude::*;

    #[test]
    fn install_activates_and_serves_offline() {
        let app = App::new(MANIFEST_V1);

        app.cmd()
            .arg("install")
            .assert()
            .success()
            .stdout(predicate::str::contains("Staged 2 resources"))
            .stdout(predicate::str::contains("Agent active"));

        let status = app.status_json();
        assert_eq!(status["state"], "active");
        assert_eq!(status["resources"], 4);
        assert_eq!(status["cached_resources"], 2);

        // Root goes to the network while online and is cached on the way
        app.cmd()
            .args(["fetch", "/"])
            .assert()
            .success()
            .stdout("<root>")
            .stderr(predicate::str::contains("network"));

        app.origin.set_online(false);

        let before = app.origin.hits("/main.dart.js");
        app.cmd()
            .args(["fetch", "/main.dart.js"])
            .assert()
            .success()
            .stdout("main()")
            .stderr(predicate::str::contains("cache"));
        assert_eq!(app.origin.hits("/main.dart.js"), before);

        app.cmd()
            .args(["fetch", "/"])
            .assert()
            .success()
            .stdout("<root>")
            .stderr(predicate::str::contains("stale cache"));

        // Never fetched, so offline it fails with the network error
        app.cmd()
            .args(["fetch", "/assets/logo.png"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Network request failed"));
    }

    #[test]
    fn unknown_resources_pass_through() {
        let app = App::new(MANIFEST_V1);
        app.cmd().arg("install").assert().success();

        app.cmd()
            .args(["fetch", "/not-in-manifest.txt"])
            .assert()
            .success()
            .stderr(predicate::str::contains("404").and(predicate::str::contains("passthrough")));

        app.cmd()
            .args(["fetch", "-X", "POST", "/main.dart.js"])
            .assert()
            .success()
            .stderr(predicate::str::contains("passthrough"));
    }

    #[test]
    fn fetch_before_install_passes_through() {
        let app = App::new(MANIFEST_V1);

        app.cmd()
            .args(["fetch", "/main.dart.js"])
            .assert()
            .success()
            .stdout("main()")
            .stderr(predicate::str::contains("passthrough"));
    }

    #[test]
    fn no_activate_waits_in_staging() {
        let app = App::new(MANIFEST_V1);

        app.cmd()
            .args(["install", "--no-activate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Agent active").not());
        assert_eq!(app.status_json()["state"], "staging");

        app.cmd()
            .args(["message", "skipWaiting"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Agent active"));
        assert_eq!(app.status_json()["state"], "active");

        app.cmd()
            .arg("activate")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Cannot activate while agent is active"));
    }

    #[test]
    fn failed_install_stages_nothing() {
        let app = App::new(MANIFEST_V1);
        app.origin.set_online(false);

        app.cmd()
            .arg("install")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Install failed"))
            .stderr(predicate::str::contains("Hint:"));

        let status = app.status_json();
        assert_eq!(status["state"], "uninstalled");
        assert_eq!(status["containers"][1]["exists"], false);
    }

    #[test]
    fn download_offline_fills_content() {
        let app = App::new(MANIFEST_V1);
        app.cmd().arg("install").assert().success();

        app.cmd()
            .args(["message", "downloadOffline"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Cached 2 resources"));
        assert_eq!(app.status_json()["cached_resources"], 4);

        app.cmd()
            .args(["message", "hello"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Ignored"));

        app.origin.set_online(false);
        app.cmd()
            .args(["fetch", "/assets/logo.png"])
            .assert()
            .success()
            .stdout("png");
    }

    #[test]
    fn upgrade_reuses_unchanged_entries() {
        let app = App::new(MANIFEST_V1);
        app.cmd().arg("install").assert().success();
        app.cmd().args(["fetch", "/assets/logo.png"]).assert().success();

        let v1 = app.status_json()["manifest_version"].clone();
        app.write_manifest(MANIFEST_V2);
        let status = app.status_json();
        assert_eq!(status["state"], "uninstalled");
        assert_eq!(status["serving_version"], v1);

        app.cmd()
            .arg("install")
            .assert()
            .success()
            .stdout(predicate::str::contains("Warm"))
            .stdout(predicate::str::contains("pruned: 1"));

        let before = app.origin.hits("/assets/logo.png");
        app.cmd()
            .args(["fetch", "/assets/logo.png"])
            .assert()
            .success()
            .stderr(predicate::str::contains("cache"));
        assert_eq!(app.origin.hits("/assets/logo.png"), before);
    }

    #[test]
    fn redeploy_keeps_serving_offline() {
        let app = App::new(MANIFEST_V1);
        app.cmd().arg("install").assert().success();
        app.cmd().args(["fetch", "/assets/logo.png"]).assert().success();

        app.write_manifest(MANIFEST_V2);
        app.origin.set_online(false);

        app.cmd()
            .args(["fetch", "/assets/logo.png"])
            .assert()
            .success()
            .stdout("png")
            .stderr(predicate::str::contains("cache"));

        // A failed install of the new version leaves the old one serving
        app.cmd().arg("install").assert().failure();
        app.cmd()
            .args(["fetch", "/main.dart.js"])
            .assert()
            .success()
            .stdout("main()");

        app.origin.set_online(true);
        app.cmd().args(["install", "--no-activate"]).assert().success();
        app.origin.set_online(false);
        assert_eq!(app.status_json()["state"], "staging");
        app.cmd()
            .args(["fetch", "/assets/logo.png"])
            .assert()
            .success()
            .stdout("png");
    }

    #[test]
    fn lifecycle_is_recorded() {
        let app = App::new(MANIFEST_V1);
        app.cmd().arg("install").assert().success();

        let record: serde_json::Value = serde_json::from_str(&app.read("agent.json")).unwrap();
        assert_eq!(record["state"], "active");
        assert!(record["activated_at"].is_string());

        let audit = app.read("audit.log");
        let events: Vec<String> = audit
            .lines()
            .map(|line| {
                let entry: serde_json::Value = serde_json::from_str(line).unwrap();
                entry["event"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(events, vec!["agent.installed", "agent.activated"]);
    }
}
