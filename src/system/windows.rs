use std::{
    os::windows::process::CommandExt,
    path::{Path, PathBuf},
    process::Command,
};

use super::run_silent_with_output;

const CREATE_NO_WINDOW: u32 = 0x08000000;
const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;

mod win32 {
    use windows::Win32::System::Console::{
        CTRL_BREAK_EVENT, GenerateConsoleCtrlEvent, GetConsoleWindow,
    };

    pub fn has_console() -> bool {
        unsafe { !GetConsoleWindow().is_invalid() }
    }

    /// Delivers CTRL_BREAK to the process group rooted at `process_id`. Only
    /// works for children sharing this process's console.
    pub fn send_ctrl_break(process_id: u32) -> bool {
        match unsafe { GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, process_id) } {
            Ok(()) => true,
            Err(error) => {
                log::warn!("[win32] GenerateConsoleCtrlEvent failed for pid {process_id}: {error}");
                false
            }
        }
    }
}

/// Console hosts get CTRL_BREAK, which chisel handles like SIGTERM. Without
/// a shared console there is no graceful path and the caller kills directly.
pub fn terminate_process(process_id: u32) -> bool {
    if !win32::has_console() {
        log::info!("[process] no console attached, pid {process_id} cannot be asked to stop");
        return false;
    }
    log::info!("[process] sending CTRL_BREAK to pid {process_id}");
    win32::send_ctrl_break(process_id)
}

/// Each child gets its own process group so CTRL_BREAK reaches only it. The
/// console is shared when there is one, otherwise the child runs windowless.
pub fn configure_command(command: &mut Command) {
    if win32::has_console() {
        command.creation_flags(CREATE_NEW_PROCESS_GROUP);
    } else {
        command.creation_flags(CREATE_NO_WINDOW | CREATE_NEW_PROCESS_GROUP);
    }
}

pub fn find_client_binary(binary: &str) -> (String, bool) {
    if binary.contains(['\\', '/']) {
        let found = Path::new(binary).exists();
        if !found {
            log::warn!("[binary] configured client {binary} does not exist");
        }
        return (binary.to_string(), found);
    }

    let (success, output) = run_silent_with_output("where", &[binary]);
    if success {
        let path = output.lines().next().unwrap_or("").trim().to_string();
        if !path.is_empty() {
            log::info!("[binary] found via where: {path}");
            return (path, true);
        }
    }

    let file_name = if binary.ends_with(".exe") {
        binary.to_string()
    } else {
        format!("{binary}.exe")
    };
    if let Ok(program_files) = std::env::var("ProgramFiles") {
        let candidate = PathBuf::from(program_files).join("chisel").join(&file_name);
        if candidate.exists() {
            log::info!("[binary] found on disk: {}", candidate.display());
            return (candidate.to_string_lossy().to_string(), true);
        }
    }

    log::warn!("[binary] {binary} not found in search paths");
    (binary.to_string(), false)
}
