use chrono::Local;
use std::fs::OpenOptions;
use std::io::Write;

use crate::paths;

const LOG_FILE_NAME: &str = "ui_perception.log";

/// Logs a message to stderr and, when the logs directory exists, to the log
/// file, prefixed with a millisecond timestamp.
pub fn log(msg: &str) {
    let line = format_line(msg);
    eprint!("{}", line);

    let logs_dir = paths::get_logs_dir();
    if !logs_dir.is_dir() {
        return;
    }
    if let Ok(mut file) = OpenOptions::new()
        .create(true)
        .append(true)
        .open(logs_dir.join(LOG_FILE_NAME))
    {
        let _ = file.write_all(line.as_bytes());
    }
}

fn format_line(msg: &str) -> String {
    let timestamp = Local::now().format("%H:%M:%S%.3f");
    format!("[{}] {}\n", timestamp, msg)
}
