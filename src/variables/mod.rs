//! Host variables used to expand `%%name%%` tokens in artifact sources.
//!
//! A variable may hold several values (one per user profile, for example), so
//! substitution returns every combination. Values may themselves reference other
//! variables; they are resolved once when the set is built.

use std::collections::{BTreeMap, BTreeSet};
use std::env;

use lazy_static::lazy_static;
use log::{debug, warn};
use regex::{Captures, Regex};

use crate::constants::MAX_SUBSTITUTION_PASSES;

pub mod unix;
#[cfg(target_os = "windows")]
pub mod windows;

lazy_static! {
    static ref TOKEN: Regex = Regex::new(r"%%([^%]+)%%").unwrap();
}

/// Read-only set of host variables.
#[derive(Debug, Clone, Default)]
pub struct HostVariables {
    // lower-cased name without the surrounding %% -> values
    variables: BTreeMap<String, BTreeSet<String>>,
}

impl HostVariables {
    /// Builds the set by running `init`, then resolving values that reference
    /// other variables.
    pub fn new<F>(init: F) -> Self
    where
        F: FnOnce(&mut HostVariables),
    {
        let mut variables = HostVariables::default();
        init(&mut variables);
        variables.resolve_variables();
        variables
    }

    /// Variables of the running host for `platform` (`Windows`, `Linux`, `Darwin`).
    pub fn for_platform(platform: &str) -> Self {
        #[cfg(target_os = "windows")]
        if platform.eq_ignore_ascii_case("windows") {
            return HostVariables::new(windows::init);
        }

        debug!("Initializing host variables for {}", platform);
        HostVariables::new(unix::init)
    }

    /// Adds one more value for `name` (`%%users.homedir%%` or `users.homedir`).
    pub fn add_variable(&mut self, name: &str, value: impl Into<String>) {
        self.variables
            .entry(normalize_name(name))
            .or_default()
            .insert(value.into());
    }

    pub fn values(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.variables.get(&normalize_name(name))
    }

    /// Re-expands every value against the whole set.
    pub fn resolve_variables(&mut self) {
        let resolved: BTreeMap<String, BTreeSet<String>> = self
            .variables
            .iter()
            .map(|(name, values)| {
                let expanded = values.iter().flat_map(|value| self.substitute(value)).collect();
                (name.clone(), expanded)
            })
            .collect();
        self.variables = resolved;
    }

    /// Expands every token in `text` with every value of its variable.
    ///
    /// Text with an unresolvable token comes back unchanged.
    pub fn substitute(&self, text: &str) -> BTreeSet<String> {
        let mut current = BTreeSet::from([text.to_string()]);

        for _ in 0..MAX_SUBSTITUTION_PASSES {
            let mut next = BTreeSet::new();
            for item in &current {
                match self.expand_once(item) {
                    Some(expanded) => next.extend(expanded),
                    None => return BTreeSet::from([text.to_string()]),
                }
            }
            if next == current {
                return current;
            }
            current = next;
        }

        warn!("Variables in '{}' do not converge, leaving it unexpanded", text);
        BTreeSet::from([text.to_string()])
    }

    /// One pass over `text`: each distinct token is replaced by each of its values.
    fn expand_once(&self, text: &str) -> Option<BTreeSet<String>> {
        let mut tokens: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for caps in TOKEN.captures_iter(text) {
            let name = caps[1].to_lowercase();
            if tokens.contains_key(&name) {
                continue;
            }
            match self.lookup(&caps[1]) {
                Some(values) => {
                    tokens.insert(name, values);
                }
                None => {
                    warn!("Value '{}' contains unsupported variable '{}'", text, &caps[0]);
                    return None;
                }
            }
        }

        if tokens.is_empty() {
            return Some(BTreeSet::from([text.to_string()]));
        }

        let mut combinations: Vec<BTreeMap<&str, &str>> = vec![BTreeMap::new()];
        for (name, values) in &tokens {
            combinations = combinations
                .iter()
                .flat_map(|combination| {
                    values.iter().map(move |value| {
                        let mut extended = combination.clone();
                        extended.insert(name.as_str(), value.as_str());
                        extended
                    })
                })
                .collect();
        }

        let expanded = combinations
            .iter()
            .map(|combination| {
                TOKEN
                    .replace_all(text, |caps: &Captures| {
                        let name = caps[1].to_lowercase();
                        combination
                            .get(name.as_str())
                            .map(|value| value.to_string())
                            .unwrap_or_else(|| caps[0].to_string())
                    })
                    .into_owned()
            })
            .collect();
        Some(expanded)
    }

    fn lookup(&self, name: &str) -> Option<Vec<String>> {
        if let Some(values) = self.variables.get(&name.to_lowercase()) {
            if !values.is_empty() {
                return Some(values.iter().cloned().collect());
            }
        }

        env::var(name.to_uppercase())
            .or_else(|_| env::var(name))
            .ok()
            .filter(|value| !value.is_empty())
            .map(|value| vec![value])
    }
}

fn normalize_name(name: &str) -> String {
    name.trim_start_matches("%%")
        .trim_end_matches("%%")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> HostVariables {
        HostVariables::new(|hv| {
            hv.add_variable("%%users.homedir%%", "%%USERDIR%%");
            hv.add_variable("%%users.homedir%%", "/tmp/root");
            hv.add_variable("%%USERDIR%%", "/home/user");
        })
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_substitute_in_middle() {
        assert_eq!(fixture().substitute("test%%USERDIR%%test"), set(&["test/home/usertest"]));
    }

    #[test]
    fn test_no_variables() {
        assert_eq!(fixture().substitute("i_dont_have_variables"), set(&["i_dont_have_variables"]));
    }

    #[test]
    fn test_unsupported_variable_is_left_alone() {
        assert_eq!(
            fixture().substitute("i_contain_%%unsupported_variable_xyz%%_variables"),
            set(&["i_contain_%%unsupported_variable_xyz%%_variables"])
        );
    }

    #[test]
    fn test_values_are_resolved_and_multiplied() {
        let hv = fixture();
        assert_eq!(hv.values("users.homedir"), Some(&set(&["/home/user", "/tmp/root"])));
        assert_eq!(
            hv.substitute("%%users.homedir%%/.bash_history"),
            set(&["/home/user/.bash_history", "/tmp/root/.bash_history"])
        );
    }

    #[test]
    fn test_cartesian_product_across_tokens() {
        let hv = HostVariables::new(|hv| {
            hv.add_variable("%%a%%", "1");
            hv.add_variable("%%a%%", "2");
            hv.add_variable("%%b%%", "x");
            hv.add_variable("%%b%%", "y");
        });
        assert_eq!(
            hv.substitute("%%a%%-%%B%%-%%a%%"),
            set(&["1-x-1", "1-y-1", "2-x-2", "2-y-2"])
        );
    }

    #[test]
    fn test_cycles_terminate() {
        let hv = HostVariables::new(|hv| {
            hv.add_variable("%%ping%%", "%%pong%%");
            hv.add_variable("%%pong%%", "%%ping%%");
        });
        assert_eq!(hv.substitute("%%ping%%"), set(&["%%ping%%"]));
    }

    #[test]
    fn test_environment_fallback() {
        env::set_var("ARTIFACT_COLLECTOR_TEST_VAR", "from-env");
        let hv = HostVariables::default();
        assert_eq!(
            hv.substitute("%%artifact_collector_test_var%%/x"),
            set(&["from-env/x"])
        );
    }
}
