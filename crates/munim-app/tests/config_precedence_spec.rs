use std::{
    env,
    ffi::{OsStr, OsString},
    fs,
    path::PathBuf,
    sync::{Mutex, OnceLock},
};

use munim_app::config;
use tempfile::TempDir;

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn env_guard() -> std::sync::MutexGuard<'static, ()> {
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .expect("config env mutex poisoned")
}

fn snapshot_env(vars: &[&'static str]) -> Vec<(&'static str, Option<OsString>)> {
    vars.iter().map(|&name| (name, env::var_os(name))).collect()
}

fn restore_env(vars: Vec<(&'static str, Option<OsString>)>) {
    for (name, value) in vars {
        match value {
            Some(val) => set_var(name, val),
            None => remove_var(name),
        }
    }
}

fn set_var(name: &str, value: impl AsRef<OsStr>) {
    unsafe { env::set_var(name, value) }
}

fn remove_var(name: &str) {
    unsafe { env::remove_var(name) }
}

#[test]
fn config_precedence_follows_documented_order() {
    let _guard = env_guard();

    let tracked = [
        "HOME",
        "XDG_DATA_HOME",
        "MUNIM__EXTRACTION__BATCH_SIZE",
        "MUNIM__EXPORT__OUTPUT_DIR",
    ];
    let env_snapshot = snapshot_env(&tracked);
    let original_dir = env::current_dir().expect("capture current dir");

    let workspace = TempDir::new().expect("temp workspace");
    let workspace_path = workspace.path();
    fs::create_dir_all(workspace_path.join("config")).expect("create local config dir");

    env::set_current_dir(workspace_path).expect("change to workspace");
    set_var("HOME", workspace_path);
    remove_var("XDG_DATA_HOME");
    remove_var("MUNIM__EXTRACTION__BATCH_SIZE");
    remove_var("MUNIM__EXPORT__OUTPUT_DIR");

    let defaults = config::load().expect("load built-in defaults");
    assert_eq!(defaults.extraction.batch_size, 5);
    assert_eq!(defaults.extraction.failure_limit, 3);
    assert_eq!(defaults.extraction.daily_call_limit, 1_500);
    assert!(defaults.export.output_dir.ends_with("exports"));

    let local_path = workspace_path.join("config").join("settings.toml");
    fs::write(&local_path, "[extraction]\nbatch_size = 8\n").expect("write config file");
    let from_file = config::load().expect("load local config");
    assert_eq!(from_file.extraction.batch_size, 8);
    // Untouched keys keep their defaults.
    assert_eq!(from_file.extraction.concurrency, 4);

    set_var("MUNIM__EXTRACTION__BATCH_SIZE", "11");
    let from_env = config::load().expect("load env override");
    assert_eq!(from_env.extraction.batch_size, 11);

    set_var("MUNIM__EXPORT__OUTPUT_DIR", "/tmp/munim-exports");
    let export_env = config::load().expect("load export override");
    assert_eq!(
        export_env.export.output_dir,
        PathBuf::from("/tmp/munim-exports")
    );

    env::set_current_dir(&original_dir).expect("restore current dir");
    restore_env(env_snapshot);
}
