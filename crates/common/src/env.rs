use std::{
    env,
    fmt::Debug,
    str::FromStr,
};

/// Read a configuration value from the environment, falling back to
/// `default` when the variable is unset or unparseable. Parse failures are
/// logged rather than fatal so a typo'd override cannot keep the service
/// from starting.
pub fn env_config<T: Debug + FromStr>(name: &str, default: T) -> T
where
    <T as FromStr>::Err: Debug,
{
    let raw = match env::var(name) {
        Ok(s) => s,
        Err(env::VarError::NotPresent) => return default,
        Err(env::VarError::NotUnicode(..)) => {
            tracing::warn!("Invalid value for {name}, falling back to {default:?}.");
            return default;
        },
    };
    match T::from_str(&raw) {
        Ok(v) => {
            tracing::info!("Overriding {name} to {v:?} from environment");
            v
        },
        Err(e) => {
            tracing::warn!("Invalid value {raw} for {name}, falling back to {default:?}: {e:?}");
            default
        },
    }
}

/// Read an optional configuration value. Unset and empty both map to
/// `None`.
pub fn env_config_opt(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(s) if !s.is_empty() => Some(s),
        _ => None,
    }
}
