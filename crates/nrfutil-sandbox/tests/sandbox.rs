//! Process-level tests against a scripted stand-in for nrfutil.
//!
//! The fake tool is a POSIX shell script run through `sh`. It understands
//! `install <module>=<version>` and `<module> --version`, and dispatches
//! every other `<module> <command>` to a per-test body.

#![cfg(unix)]

use nrfutil_sandbox::{
    BackgroundTask, LogLevel, NrfutilSandbox, Progress, ProgressCallback, SandboxConfig,
    SandboxError, SandboxOverrides,
};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const PRELUDE: &str = r#"
case "$1" in
  install)
    mkdir -p "$NRFUTIL_HOME"
    echo "$2" >> "$NRFUTIL_HOME/install-count"
    if [ -f "$NRFUTIL_HOME/fail-install" ]; then
      echo "registry unreachable" >&2
      echo '{"type":"task_end","data":{"result":"fail","message":"install failed"}}'
      exit 1
    fi
    echo "${2#*=}" > "$NRFUTIL_HOME/installed"
    echo '{"type":"task_progress","data":{"progress":{"progressPercentage":100}}}'
    echo '{"type":"task_end","data":{"result":"success"}}'
    exit 0
    ;;
  --version)
    echo '{"type":"info","data":{"name":"nrfutil","version":"7.13.0"}}'
    echo '{"type":"task_end","data":{"result":"success"}}'
    exit 0
    ;;
esac
if [ "$2" = "--version" ]; then
  if [ ! -f "$NRFUTIL_HOME/installed" ]; then
    echo "unknown subcommand $1" >&2
    exit 1
  fi
  printf '{"type":"info","data":{"name":"nrfutil-%s","version":"%s","dependencies":[]}}\n' "$1" "$(cat "$NRFUTIL_HOME/installed")"
  echo '{"type":"task_end","data":{"result":"success"}}'
  exit 0
fi
"#;

struct Fixture {
    dir: TempDir,
    sandbox: NrfutilSandbox,
}

impl Fixture {
    fn new(body: &str) -> Self {
        Self::with_overrides(body, SandboxOverrides::default())
    }

    fn with_overrides(body: &str, overrides: SandboxOverrides) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox_in(dir.path(), body, overrides);
        Self { dir, sandbox }
    }

    fn home(&self) -> &Path {
        self.sandbox.home_dir()
    }

    fn install_count(&self) -> usize {
        std::fs::read_to_string(self.home().join("install-count"))
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }
}

fn sandbox_in(dir: &Path, body: &str, overrides: SandboxOverrides) -> NrfutilSandbox {
    let script = dir.join("nrfutil.sh");
    std::fs::write(&script, format!("{PRELUDE}\ncase \"$2\" in\n{body}\nesac\n")).unwrap();

    let config = SandboxConfig::builder()
        .base_dir(dir.join("app"))
        .module("device")
        .version("2.1.1")
        .executable("sh")
        .executable_args([script.to_string_lossy().into_owned()])
        .overrides(overrides)
        .install_lock_timeout(Duration::from_secs(5))
        .build()
        .unwrap();
    NrfutilSandbox::new(config).unwrap()
}

const PROGRAM_BODY: &str = r#"
  succeed)
    echo '{"type":"log","data":{"level":"INFO","message":"starting"}}'
    echo '{"type":"task_progress","data":{"progress":{"progressPercentage":50}}}'
    echo '{"type":"task_end","data":{"result":"success","data":{"x":1}}}'
    ;;
  fail)
    echo '{"type":"log","data":{"level":"ERROR","message":"connection lost"}}'
    echo "boom" >&2
    echo '{"type":"task_end","data":{"result":"fail","message":"device not found"}}'
    exit 1
    ;;
  latin1)
    printf '{"type":"log","data":{"level":"INFO","message":"caf\351"}}\n'
    echo '{"type":"task_progress","data":{"progress":{"progressPercentage":50}}}'
    printf '{"type":"task_end","data":{"result":"success","data":{"x":1}}}'
    ;;
  crash)
    echo '{"type":"task_progress","data":{"progress":{"progressPercentage":10}}}'
    exit 3
    ;;
  hang)
    exec sleep 30
    ;;
  env)
    printf '{"type":"task_end","data":{"result":"success","data":{"log":"%s","index":"%s","home":"%s","exec":"%s"}}}\n' \
      "${NRFUTIL_LOG-unset}" "${NRFUTIL_PACKAGE_INDEX_URL-unset}" "$NRFUTIL_HOME" "$NRFUTIL_EXEC_PATH"
    ;;
  args)
    shift 2
    printf '{"type":"task_end","data":{"result":"success","data":"%s"}}\n' "$*"
    ;;
"#;

fn progress_recorder() -> (Arc<Mutex<Vec<f64>>>, ProgressCallback) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let callback: ProgressCallback = Box::new(move |progress: &Progress| {
        sink.lock().unwrap().push(progress.progress_percentage);
    });
    (seen, callback)
}

#[tokio::test]
async fn test_prepare_installs_once() {
    let fixture = Fixture::new(PROGRAM_BODY);
    assert!(!fixture.sandbox.is_sandbox_installed().await);

    let (progress, on_progress) = progress_recorder();
    fixture.sandbox.prepare_sandbox(Some(on_progress)).await.unwrap();
    assert_eq!(fixture.install_count(), 1);
    assert_eq!(*progress.lock().unwrap(), vec![100.0]);
    assert!(fixture.sandbox.is_sandbox_installed().await);

    fixture.sandbox.prepare_sandbox(None).await.unwrap();
    assert_eq!(fixture.install_count(), 1);

    // A fresh instance over the same directory finds the installation.
    let again = sandbox_in(fixture.dir.path(), PROGRAM_BODY, SandboxOverrides::default());
    again.prepare_sandbox(None).await.unwrap();
    assert_eq!(fixture.install_count(), 1);
}

#[tokio::test]
async fn test_version_mismatch_reinstalls() {
    let fixture = Fixture::new(PROGRAM_BODY);
    std::fs::create_dir_all(fixture.home()).unwrap();
    std::fs::write(fixture.home().join("installed"), "2.0.0\n").unwrap();

    let reported = fixture.sandbox.get_module_version().await.unwrap();
    assert_eq!(reported.version, "2.0.0");
    assert!(!fixture.sandbox.is_sandbox_installed().await);

    fixture.sandbox.prepare_sandbox(None).await.unwrap();
    assert_eq!(fixture.install_count(), 1);
    assert_eq!(
        fixture.sandbox.get_module_version().await.unwrap().version,
        "2.1.1"
    );
}

#[tokio::test]
async fn test_install_failure_is_reported() {
    let fixture = Fixture::new(PROGRAM_BODY);
    std::fs::create_dir_all(fixture.home()).unwrap();
    std::fs::write(fixture.home().join("fail-install"), "").unwrap();

    let err = fixture.sandbox.prepare_sandbox(None).await.unwrap_err();
    assert!(matches!(err, SandboxError::InstallFailed { .. }));
    assert_eq!(err.exit_code(), Some(1));

    let message = format!("{:?}", err);
    assert!(message.contains("install failed"));
    assert!(message.contains("registry unreachable"));
    assert!(!fixture.sandbox.is_sandbox_installed().await);
}

#[tokio::test]
async fn test_core_version() {
    let fixture = Fixture::new(PROGRAM_BODY);
    let core = fixture.sandbox.get_core_version().await.unwrap();
    assert_eq!(core.name, "nrfutil");
    assert_eq!(core.version, "7.13.0");
}

#[tokio::test]
async fn test_successful_command_routes_events() {
    let fixture = Fixture::new(PROGRAM_BODY);

    let logs = Arc::new(Mutex::new(Vec::new()));
    for _ in 0..2 {
        let logs = Arc::clone(&logs);
        fixture
            .sandbox
            .on_logging(move |message| logs.lock().unwrap().push(message.message.clone()));
    }

    let (progress, on_progress) = progress_recorder();
    let result = fixture
        .sandbox
        .spawn_subcommand("succeed", vec![], Some(on_progress))
        .await
        .unwrap();

    assert_eq!(result, Some(json!({"x": 1})));
    assert_eq!(*progress.lock().unwrap(), vec![50.0]);
    assert_eq!(*logs.lock().unwrap(), vec!["starting", "starting"]);
}

#[tokio::test]
async fn test_invalid_utf8_line_does_not_end_stream() {
    let fixture = Fixture::new(PROGRAM_BODY);

    let logs = Arc::new(Mutex::new(Vec::new()));
    {
        let logs = Arc::clone(&logs);
        fixture
            .sandbox
            .on_logging(move |message| logs.lock().unwrap().push(message.message.clone()));
    }

    let (progress, on_progress) = progress_recorder();
    let result = fixture
        .sandbox
        .spawn_subcommand("latin1", vec![], Some(on_progress))
        .await
        .unwrap();

    // The last line has no trailing newline.
    assert_eq!(result, Some(json!({"x": 1})));
    assert_eq!(*progress.lock().unwrap(), vec![50.0]);
    assert_eq!(*logs.lock().unwrap(), vec!["caf\u{fffd}"]);
}

#[tokio::test]
async fn test_failed_command_carries_message_and_stderr() {
    let fixture = Fixture::new(PROGRAM_BODY);
    let levels = Arc::new(Mutex::new(Vec::new()));
    {
        let levels = Arc::clone(&levels);
        fixture
            .sandbox
            .on_logging(move |message| levels.lock().unwrap().push(message.level));
    }

    let err = fixture
        .sandbox
        .spawn_subcommand("fail", vec![], None)
        .await
        .unwrap_err();

    assert_eq!(err.exit_code(), Some(1));
    let message = err.to_string();
    assert!(message.contains("device not found"), "{message}");
    assert!(message.contains("boom"), "{message}");
    assert_eq!(*levels.lock().unwrap(), vec![LogLevel::Error]);
}

#[tokio::test]
async fn test_crash_without_result_fails_cleanly() {
    let fixture = Fixture::new(PROGRAM_BODY);

    let err = fixture
        .sandbox
        .spawn_subcommand("crash", vec![], None)
        .await
        .unwrap_err();

    assert_eq!(err.exit_code(), Some(3));
    assert!(err.to_string().contains("without reporting a result"));
}

#[tokio::test]
async fn test_cancel_terminates_process() {
    let fixture = Fixture::new(PROGRAM_BODY);
    let operation = fixture.sandbox.spawn_subcommand("hang", vec![], None);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!operation.is_finished());
    operation.cancel();
    assert!(operation.was_cancelled());

    let result = tokio::time::timeout(Duration::from_secs(10), operation)
        .await
        .expect("cancelled process should close");
    assert!(matches!(
        result,
        Err(SandboxError::CommandFailed { exit_code: None, .. })
    ));
}

#[tokio::test]
async fn test_exec_subcommand_decodes() {
    let fixture = Fixture::new(PROGRAM_BODY);
    let text: String = fixture
        .sandbox
        .exec_subcommand("args", vec!["--serial-number".into(), "1050".into()])
        .await
        .unwrap();
    assert_eq!(text, "--serial-number 1050 --json --log-output=stdout");

    let err = fixture
        .sandbox
        .exec_subcommand::<u32>("args", vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::Decode { .. }));
}

#[tokio::test]
async fn test_log_level_reaches_tool() {
    let fixture = Fixture::new(PROGRAM_BODY);
    fixture.sandbox.set_log_level(Some(LogLevel::Trace));

    let text: String = fixture.sandbox.exec_subcommand("args", vec![]).await.unwrap();
    assert_eq!(text, "--json --log-output=stdout --log-level trace");
}

#[tokio::test]
async fn test_environment_overrides() {
    let overrides = SandboxOverrides {
        package_index_url: Some("https://index.example/".into()),
        ..Default::default()
    };
    let fixture = Fixture::with_overrides(PROGRAM_BODY, overrides);

    let env: Value = fixture.sandbox.exec_subcommand("env", vec![]).await.unwrap();
    let home = fixture.home().to_string_lossy().into_owned();

    assert_eq!(env["log"], "unset");
    assert_eq!(env["index"], "https://index.example/");
    assert_eq!(env["home"], home.as_str());
    assert_eq!(env["exec"], format!("{home}/bin").as_str());
}

const STREAM_BODY: &str = r#"
  list)
    echo '{"type":"info","data":{"id":1}}'
    echo 'not json'
    echo '{"type":"info","data":{"id":2}}'
    echo '{"type":"task_end","data":{"result":"success","data":[{"id":3},{"id":4}]}}'
    ;;
  broken)
    echo '{"type":"info","data":{"id":1}}'
    echo "lost connection" >&2
    exit 2
    ;;
  watch)
    echo '{"type":"info","data":{"id":1}}'
    exec sleep 30
    ;;
"#;

type Recorded<T> = Arc<Mutex<Vec<T>>>;

fn background(
    fixture: &Fixture,
    command: &str,
) -> (
    BackgroundTask,
    Recorded<Value>,
    Recorded<String>,
) {
    let data = Arc::new(Mutex::new(Vec::new()));
    let errors = Arc::new(Mutex::new(Vec::new()));

    let on_data = {
        let data = Arc::clone(&data);
        Box::new(move |item: Value| data.lock().unwrap().push(item))
    };
    let on_error = {
        let errors = Arc::clone(&errors);
        Box::new(move |e: SandboxError| errors.lock().unwrap().push(e.to_string()))
    };

    let task = fixture
        .sandbox
        .spawn_background_subcommand(command, vec![], on_data, on_error)
        .unwrap();
    (task, data, errors)
}

#[tokio::test]
async fn test_background_streams_items_in_order() {
    let fixture = Fixture::new(STREAM_BODY);
    let (task, data, errors) = background(&fixture, "list");

    let closed = Arc::new(Mutex::new(Vec::new()));
    for name in ["first", "second"] {
        let closed = Arc::clone(&closed);
        task.on_closed(move |code| closed.lock().unwrap().push((name, code)));
    }

    assert_eq!(task.closed().await, Some(0));
    assert!(!task.is_running());

    let ids: Vec<i64> = data
        .lock()
        .unwrap()
        .iter()
        .map(|item| item["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);

    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("malformed"));

    assert_eq!(
        *closed.lock().unwrap(),
        vec![("first", Some(0)), ("second", Some(0))]
    );
}

#[tokio::test]
async fn test_background_failure_reports_error() {
    let fixture = Fixture::new(STREAM_BODY);
    let (task, data, errors) = background(&fixture, "broken");

    assert_eq!(task.closed().await, Some(2));
    assert_eq!(data.lock().unwrap().len(), 1);

    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("lost connection"));
}

#[tokio::test]
async fn test_background_stop() {
    let fixture = Fixture::new(STREAM_BODY);
    let (task, data, errors) = background(&fixture, "watch");

    tokio::time::timeout(Duration::from_secs(10), async {
        while data.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("first item should arrive while running");
    assert!(task.is_running());

    let removed = Arc::new(Mutex::new(0));
    let kept = Arc::new(Mutex::new(Vec::new()));
    let subscription = {
        let removed = Arc::clone(&removed);
        task.on_closed(move |_| *removed.lock().unwrap() += 1)
    };
    subscription.unsubscribe();
    {
        let kept = Arc::clone(&kept);
        task.stop_with(move |code| kept.lock().unwrap().push(code));
    }

    let code = tokio::time::timeout(Duration::from_secs(10), task.closed())
        .await
        .expect("stopped task should close");
    assert_eq!(code, None);
    assert_eq!(*kept.lock().unwrap(), vec![None]);
    assert_eq!(*removed.lock().unwrap(), 0);
    assert!(errors.lock().unwrap().is_empty());
}
