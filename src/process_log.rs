use std::{
    collections::VecDeque,
    fs,
    io::{BufRead, BufReader, Read, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

const MAX_LOG_LINES: usize = 500;

/// Most recent output lines of the supervised client, both streams merged.
#[derive(Default)]
pub struct ProcessLog {
    lines: VecDeque<String>,
}

impl ProcessLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.lines.clear();
    }

    pub fn push_line(&mut self, line: String) {
        self.lines.push_back(line);
        if self.lines.len() > MAX_LOG_LINES {
            self.lines.pop_front();
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }
}

pub type SharedProcessLog = Arc<Mutex<ProcessLog>>;
pub type SessionLogFile = Arc<Mutex<fs::File>>;

pub fn session_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string()
}

fn sanitize_session_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|character| match character {
            '/' | '\\' | '\0' | ':' => '_',
            _ => character,
        })
        .collect();
    if sanitized.trim().is_empty() {
        "unknown".into()
    } else {
        sanitized
    }
}

pub fn session_log_path(logs_directory: &Path, session_name: &str) -> PathBuf {
    logs_directory
        .join(sanitize_session_name(session_name))
        .join(format!("{}.log", session_timestamp()))
}

pub fn create_session_log_file(logs_directory: &Path, session_name: &str) -> Option<SessionLogFile> {
    let log_path = session_log_path(logs_directory, session_name);
    if let Some(parent) = log_path.parent()
        && let Err(error) = fs::create_dir_all(parent)
    {
        log::warn!("[logs] failed to create log directory: {error}");
        return None;
    }

    match fs::File::create(&log_path) {
        Ok(file) => {
            log::info!("[logs] session log: {}", log_path.display());
            Some(Arc::new(Mutex::new(file)))
        }
        Err(error) => {
            log::warn!("[logs] failed to create log file: {error}");
            None
        }
    }
}

/// Drains one output stream of the child on a background thread until it
/// closes. Keeping the pipe drained prevents the child from blocking on a
/// full pipe buffer.
pub fn start_log_reader<R>(
    stream: R,
    stream_name: &'static str,
    shared_log: SharedProcessLog,
    log_file: Option<SessionLogFile>,
) where
    R: Read + Send + 'static,
{
    std::thread::spawn(move || {
        let reader = BufReader::new(stream);
        for line in reader.lines() {
            match line {
                Ok(line) => {
                    if let Some(ref log_file) = log_file {
                        let mut file = log_file.lock().unwrap_or_else(PoisonError::into_inner);
                        if let Err(error) = writeln!(file, "{line}") {
                            log::warn!("[logs] failed to write {stream_name} line: {error}");
                        }
                    }
                    log::trace!("[child {stream_name}] {line}");
                    shared_log
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push_line(line);
                }
                Err(error) => {
                    log::trace!("[child {stream_name}] reader ended: {error}");
                    break;
                }
            }
        }
    });
}
