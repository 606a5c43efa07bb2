use std::{
    path::Path,
    process::Command,
};

use super::{run_silent, run_silent_with_output};

pub fn terminate_process(process_id: u32) -> bool {
    let process_id_string = process_id.to_string();
    run_silent("kill", &["-TERM", &process_id_string])
}

pub fn configure_command(_command: &mut Command) {}

/// Resolves `binary` through `PATH` and the usual install locations. Returns
/// the name unchanged (and `false`) when nothing is found so that spawning
/// still reports the real error.
pub fn find_client_binary(binary: &str) -> (String, bool) {
    if binary.contains('/') {
        let found = Path::new(binary).exists();
        if !found {
            log::warn!("[binary] configured client {binary} does not exist");
        }
        return (binary.to_string(), found);
    }

    let (success, output) = run_silent_with_output("which", &[binary]);
    if success {
        let path = output.trim().to_string();
        if !path.is_empty() {
            log::info!("[binary] found via which: {binary} → {path}");
            return (path, true);
        }
    }

    for directory in ["/usr/local/bin", "/usr/bin", "/opt/chisel"] {
        let candidate = Path::new(directory).join(binary);
        if candidate.exists() {
            log::info!("[binary] found on disk: {}", candidate.display());
            return (candidate.to_string_lossy().to_string(), true);
        }
    }

    log::warn!("[binary] {binary} not found in search paths");
    (binary.to_string(), false)
}
