use std::path::Path;

use log::{debug, warn};
use winreg::enums::{HKEY_LOCAL_MACHINE, HKEY_USERS, KEY_READ, KEY_WOW64_64KEY};
use winreg::RegKey;

use super::HostVariables;

const CURRENT_VERSION_NT: &str = r"Software\Microsoft\Windows NT\CurrentVersion";
const CURRENT_VERSION: &str = r"Software\Microsoft\Windows\CurrentVersion";
const PROFILE_LIST: &str = r"Software\Microsoft\Windows NT\CurrentVersion\ProfileList";
const SESSION_ENVIRONMENT: &str = r"System\CurrentControlSet\Control\Session Manager\Environment";
const DEFAULT_SHELL_FOLDERS: &str =
    r".DEFAULT\Software\Microsoft\Windows\CurrentVersion\Explorer\User Shell Folders";
const DEFAULT_ENVIRONMENT: &str = r".DEFAULT\Environment";
const LOCAL_APPDATA_LOW: &str = r"Software\Microsoft\Windows\CurrentVersion\Explorer\FolderDescriptions\{A520A1A4-1780-4FF6-BD18-167343C5AF16}";

// %NAME% environment references found in registry values
const ENVIRONMENT_REFERENCES: &[(&str, &str)] = &[
    ("%USERPROFILE%", "%%users.userprofile%%"),
    ("%SYSTEMROOT%", "%%environ_systemroot%%"),
    ("%SYSTEMDRIVE%", "%%environ_systemdrive%%"),
    ("%WINDIR%", "%%environ_windir%%"),
    ("%PROGRAMDATA%", "%%environ_allusersappdata%%"),
    ("%PROGRAMFILES%", "%%environ_programfiles%%"),
];

/// Variables of a Windows host, read from the registry.
pub fn init(hv: &mut HostVariables) {
    let hklm = RegKey::predef(HKEY_LOCAL_MACHINE);
    let hku = RegKey::predef(HKEY_USERS);

    match reg(&hklm, CURRENT_VERSION_NT, &["SystemRoot"]) {
        Some(systemroot) => {
            let systemdrive: String = systemroot.chars().take(2).collect();
            hv.add_variable("%%environ_systemroot%%", systemroot);
            hv.add_variable("%%environ_systemdrive%%", systemdrive);
        }
        None => warn!("Unable to read SystemRoot from the registry"),
    }

    let values = [
        ("%%environ_windir%%", &hklm, SESSION_ENVIRONMENT, &["windir"][..]),
        ("%%environ_allusersappdata%%", &hklm, PROFILE_LIST, &["ProgramData"][..]),
        ("%%environ_programfiles%%", &hklm, CURRENT_VERSION, &["ProgramFilesDir"][..]),
        (
            "%%environ_programfilesx86%%",
            &hklm,
            CURRENT_VERSION,
            &["ProgramFilesDir (x86)", "ProgramFilesDir"][..],
        ),
        (
            "%%environ_allusersprofile%%",
            &hklm,
            PROFILE_LIST,
            &["AllUsersProfile", "ProgramData"][..],
        ),
        ("%%users.localappdata%%", &hku, DEFAULT_SHELL_FOLDERS, &["Local AppData"][..]),
        ("%%users.appdata%%", &hku, DEFAULT_SHELL_FOLDERS, &["AppData"][..]),
        ("%%users.temp%%", &hku, DEFAULT_ENVIRONMENT, &["TEMP"][..]),
    ];
    for (name, hive, path, value_names) in values {
        match reg(hive, path, value_names) {
            Some(value) => hv.add_variable(name, expand_environment_references(&value)),
            None => debug!("No registry value for {}", name),
        }
    }

    match reg(&hklm, LOCAL_APPDATA_LOW, &["RelativePath"]) {
        Some(relative) => hv.add_variable(
            "%%users.localappdata_low%%",
            format!("%%users.userprofile%%\\{}", relative.trim_start_matches('\\')),
        ),
        None => hv.add_variable(
            "%%users.localappdata_low%%",
            "%%users.userprofile%%\\AppData\\LocalLow",
        ),
    }

    let profiles = user_profiles(&hklm);
    for (sid, profile) in &profiles {
        let profile = expand_environment_references(profile);
        hv.add_variable("%%users.homedir%%", profile.clone());
        hv.add_variable("%%users.userprofile%%", profile.clone());
        hv.add_variable("%%users.sid%%", sid.clone());
        if let Some(username) = Path::new(&profile.replace('\\', "/")).file_name() {
            hv.add_variable("%%users.username%%", username.to_string_lossy());
        }
    }

    match hku.enum_keys().collect::<Result<Vec<_>, _>>() {
        Ok(names) => {
            for sid in names {
                if !sid.contains("_Classes") && sid != ".DEFAULT" {
                    hv.add_variable("%%users.sid%%", sid);
                }
            }
        }
        Err(e) => warn!("Unable to enumerate HKEY_USERS: {}", e),
    }

    hv.add_variable(
        "%%current_control_set%%",
        "HKEY_LOCAL_MACHINE\\System\\CurrentControlSet",
    );
}

fn reg(hive: &RegKey, path: &str, value_names: &[&str]) -> Option<String> {
    let key = hive
        .open_subkey_with_flags(path, KEY_READ | KEY_WOW64_64KEY)
        .ok()?;
    value_names
        .iter()
        .find_map(|name| key.get_value::<String, _>(name).ok())
        .filter(|value| !value.is_empty())
}

/// `(sid, ProfileImagePath)` for every profile in ProfileList.
fn user_profiles(hklm: &RegKey) -> Vec<(String, String)> {
    let list = match hklm.open_subkey_with_flags(PROFILE_LIST, KEY_READ) {
        Ok(list) => list,
        Err(e) => {
            warn!("Unable to open ProfileList: {}", e);
            return Vec::new();
        }
    };

    list.enum_keys()
        .filter_map(Result::ok)
        .filter_map(|sid| {
            let profile = list
                .open_subkey_with_flags(&sid, KEY_READ)
                .and_then(|key| key.get_value::<String, _>("ProfileImagePath"))
                .ok()?;
            Some((sid, profile))
        })
        .collect()
}

/// Rewrites `%NAME%` references left in registry strings as host variables.
fn expand_environment_references(value: &str) -> String {
    let mut expanded = value.to_string();
    for (reference, variable) in ENVIRONMENT_REFERENCES {
        while let Some(start) = expanded.to_ascii_uppercase().find(reference) {
            expanded.replace_range(start..start + reference.len(), variable);
        }
    }
    expanded
}
