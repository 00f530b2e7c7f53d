use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::Path;

use log::{debug, warn};

use super::HostVariables;

const PASSWD_PATH: &str = "/etc/passwd";

/// Variables of a Linux or macOS host.
pub fn init(hv: &mut HostVariables) {
    let home = env::var("HOME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "/home/unknown".to_string());
    init_with(hv, &home, Path::new(PASSWD_PATH));
}

/// Same as [`init`] with an explicit home directory and passwd file.
pub fn init_with(hv: &mut HostVariables, home: &str, passwd: &Path) {
    debug!("Home directory is {}", home);

    let home_path = Path::new(home);
    hv.add_variable("%%users.homedir%%", home);
    hv.add_variable("%%users.userprofile%%", home);
    hv.add_variable(
        "%%users.localappdata%%",
        home_path.join(".local").join("share").to_string_lossy(),
    );
    hv.add_variable("%%users.appdata%%", home_path.join(".config").to_string_lossy());

    hv.add_variable("%%environ_programdata%%", "/etc");
    hv.add_variable("%%environ_systemdrive%%", "/");
    hv.add_variable("%%environ_programfiles%%", "/usr/local");
    hv.add_variable("%%environ_programfilesx86%%", "/usr/local");
    hv.add_variable("%%environ_allusersappdata%%", "/etc");

    let content = match fs::read_to_string(passwd) {
        Ok(content) => content,
        Err(e) => {
            warn!("Failed to read {}: {}", passwd.display(), e);
            return;
        }
    };

    for dir in passwd_home_dirs(&content) {
        if !dir.eq_ignore_ascii_case(home) {
            debug!("Adding home directory {}", dir);
            hv.add_variable("%%users.homedir%%", dir.clone());
            hv.add_variable("%%users.localappdata%%", dir);
        }
    }
}

fn passwd_home_dirs(content: &str) -> BTreeSet<String> {
    content
        .lines()
        .filter_map(|line| line.split(':').nth(5))
        .filter(|dir| !dir.is_empty())
        .map(str::to_string)
        .collect()
}
