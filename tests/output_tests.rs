use async_binary_logger::{log_error, log_notice, InitResult, Logger, LoggerConfig, Severity};
use std::fs;
use tempfile::TempDir;

fn config_for(dir: &TempDir) -> LoggerConfig {
    let toml = format!(
        r#"
        [severity]
        file = "notice"
        stdout = "off"
        stderr = "off"

        [timestamp]
        enabled = false

        [file]
        out_folder = {:?}
        prefix = "run-"
        suffix = ".txt"
        approx_max_size = 1000
        file_count = 0
        "#,
        dir.path().display().to_string()
    );
    LoggerConfig::from_toml_str(&toml).unwrap()
}

fn read_all(dir: &TempDir) -> (usize, Vec<String>) {
    let mut paths: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    paths.sort_by_key(|p| {
        let name = p.file_name().unwrap().to_str().unwrap().to_string();
        name["run-".len()..name.len() - ".txt".len()].parse::<u64>().unwrap()
    });
    let lines = paths
        .iter()
        .flat_map(|p| {
            fs::read_to_string(p)
                .unwrap()
                .lines()
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect();
    (paths.len(), lines)
}

#[test]
fn test_rotated_files_hold_every_line() {
    let dir = TempDir::new().unwrap();
    let logger = Logger::new(config_for(&dir));
    assert_eq!(logger.init_output(), InitResult::Ok);

    for i in 0..500u32 {
        log_error!(logger, "line {}", i);
    }
    // Below the file threshold.
    logger.set_console_severity(Severity::Off);
    let mut filtered = 0;
    logger.set_severity(Severity::Error);
    for _ in 0..10 {
        if log_notice!(logger, "quiet") == async_binary_logger::Push::Filtered {
            filtered += 1;
        }
    }
    assert_eq!(filtered, 10);
    assert!(logger.on_termination());

    let (files, lines) = read_all(&dir);
    assert!(files > 1, "expected rotation, got {files} file(s)");
    let expected: Vec<String> = (0..500).map(|i| format!("[err] line {i}")).collect();
    assert_eq!(lines, expected);
}

#[test]
fn test_restart_continues_sequence() {
    let dir = TempDir::new().unwrap();
    for run in 0..2u32 {
        let logger = Logger::new(config_for(&dir));
        assert_eq!(logger.init_output(), InitResult::Ok);
        log_error!(logger, "run {}", run);
        logger.on_termination();
    }
    let (files, lines) = read_all(&dir);
    assert_eq!(files, 2);
    assert_eq!(lines, vec!["[err] run 0", "[err] run 1"]);
}
