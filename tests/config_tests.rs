//! Configuration layering tests: defaults, file loading, and the three
//! flat contract environment variables taking precedence over everything.

use std::io::Write;
use voxlogica_core::Config;

fn unique_env_lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[test]
fn loading_a_toml_file_overrides_defaults() {
    let _guard = unique_env_lock();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "[store]\ndata_dir = \"/tmp/custom-store\"\n[engine]\nworkers = 3\n[reducer]\nrecursion_limit = 256").unwrap();

    let config = Config::from_file(path.to_str().unwrap()).unwrap();
    assert_eq!(config.engine.workers, 3);
    assert_eq!(config.reducer.recursion_limit, 256);
    assert_eq!(config.store.data_dir, std::path::PathBuf::from("/tmp/custom-store"));
}

#[test]
fn flat_contract_env_vars_override_a_loaded_file() {
    let _guard = unique_env_lock();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "[store]\ndata_dir = \"/tmp/from-file\"\n[engine]\nworkers = 3\n[reducer]\nrecursion_limit = 256").unwrap();

    std::env::set_var("CORE_STORE_PATH", "/tmp/from-env");
    std::env::set_var("CORE_WORKERS", "9");
    let config = Config::from_file(path.to_str().unwrap()).unwrap();
    std::env::remove_var("CORE_STORE_PATH");
    std::env::remove_var("CORE_WORKERS");

    assert_eq!(config.store.data_dir, std::path::PathBuf::from("/tmp/from-env"));
    assert_eq!(config.engine.workers, 9);
    // untouched by the flat overrides, still comes from the file.
    assert_eq!(config.reducer.recursion_limit, 256);
}

#[test]
fn missing_config_files_fall_back_to_struct_defaults_for_unset_fields() {
    let _guard = unique_env_lock();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "[store]\ndata_dir = \"/tmp/only-store\"\n[engine]\n[reducer]").unwrap();

    let config = Config::from_file(path.to_str().unwrap()).unwrap();
    assert_eq!(config.engine.workers, 0);
    assert_eq!(config.reducer.recursion_limit, 1024);
    assert!(config.store.sync_on_write);
}
