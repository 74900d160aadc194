//! # Configuration d'OndeRadio
//!
//! Gestion de la configuration de la station :
//! - chargement depuis un fichier YAML externe
//! - fusion avec la configuration par défaut embarquée
//! - surcharge par variables d'environnement
//! - accès singleton thread-safe et getters typés
//!
//! ## Usage
//!
//! ```no_run
//! use ondeconfig::get_config;
//!
//! let config = get_config();
//! let port = config.get_http_port();
//! let ffmpeg = config.get_ffmpeg_path();
//! ```

use anyhow::{anyhow, Result};
use dirs::home_dir;
use lazy_static::lazy_static;
use serde_yaml::{Mapping, Value};
use std::{env, fs, path::Path, sync::Arc, sync::Mutex};
use tracing::info;

// Configuration par défaut intégrée
const DEFAULT_CONFIG: &str = include_str!("onderadio.yaml");

const ENV_CONFIG_DIR: &str = "ONDERADIO_CONFIG";
const ENV_PREFIX: &str = "ONDERADIO_CONFIG__";
const CONFIG_FILE_NAME: &str = "onderadio.yaml";

const DEFAULT_HTTP_PORT: u16 = 8000;
const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";
const DEFAULT_FFMPEG_PATH: &str = "ffmpeg";
const DEFAULT_YTDLP_PATH: &str = "yt-dlp";

lazy_static! {
    static ref CONFIG: Arc<Config> =
        Arc::new(Config::load_config("").expect("Failed to load OndeRadio configuration"));
}

/// Retourne le singleton de configuration.
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

/// Gestionnaire de configuration d'OndeRadio.
#[derive(Debug)]
pub struct Config {
    data: Mutex<Value>,
}

impl Config {
    /// Cherche le répertoire de configuration.
    ///
    /// Ordre d'essai : paramètre explicite, variable d'environnement
    /// `ONDERADIO_CONFIG`, `.onderadio` dans le répertoire courant puis dans
    /// le home de l'utilisateur.
    fn find_config_dir(directory: &str) -> String {
        if !directory.is_empty() {
            return directory.to_string();
        }

        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path = %env_path, "Trying to load config from env");
            return env_path;
        }

        if Path::new(".onderadio").exists() {
            return ".onderadio".to_string();
        }

        if let Some(home) = home_dir() {
            let home_config = home.join(".onderadio");
            if home_config.exists() {
                return home_config.to_string_lossy().to_string();
            }
        }

        ".onderadio".to_string()
    }

    /// Charge la configuration depuis le répertoire donné.
    ///
    /// Fusionne la configuration embarquée avec le fichier externe s'il
    /// existe, puis applique les surcharges d'environnement de la forme
    /// `ONDERADIO_CONFIG__section__clef=valeur`.
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::find_config_dir(directory);
        let config_file_path = Path::new(&config_dir).join(CONFIG_FILE_NAME);

        let mut merged: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        if let Ok(data) = fs::read(&config_file_path) {
            info!(config_file = %config_file_path.display(), "Loaded config file");
            let external: Value = serde_yaml::from_slice(&data)?;
            merge_yaml(&mut merged, &external);
        } else {
            info!(
                config_file = %config_file_path.display(),
                "Config file not found, using default embedded config"
            );
        }

        let mut config = Self {
            data: Mutex::new(merged),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        for (key, value) in env::vars() {
            let Some(path) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let path = path.to_lowercase().replace("__", ".");
            let parsed: Value =
                serde_yaml::from_str(&value).unwrap_or(Value::String(value.clone()));
            if self.set_value(&path, parsed).is_ok() {
                info!(path = %path, "Applied config override from environment");
            }
        }
    }

    /// Lit une valeur à un chemin pointé ("section.clef").
    pub fn get_value(&self, path: &str) -> Result<Value> {
        let data = self.data.lock().unwrap();
        let mut current = &*data;
        for part in path.split('.') {
            current = current
                .get(part)
                .ok_or_else(|| anyhow!("Config key not found: {path}"))?;
        }
        Ok(current.clone())
    }

    /// Écrit une valeur à un chemin pointé, en créant les mappings
    /// intermédiaires au besoin.
    pub fn set_value(&self, path: &str, value: Value) -> Result<()> {
        let mut data = self.data.lock().unwrap();
        let mut current = &mut *data;
        let parts: Vec<&str> = path.split('.').collect();

        for part in &parts[..parts.len() - 1] {
            let Value::Mapping(mapping) = current else {
                return Err(anyhow!("Config path is not a mapping: {path}"));
            };
            let key = Value::String(part.to_string());
            current = mapping.entry(key).or_insert(Value::Mapping(Mapping::new()));
        }

        let mapping = current
            .as_mapping_mut()
            .ok_or_else(|| anyhow!("Config path is not a mapping: {path}"))?;
        let last = parts
            .last()
            .ok_or_else(|| anyhow!("Empty config path"))?;
        mapping.insert(Value::String(last.to_string()), value);
        Ok(())
    }

    /// Port HTTP du serveur de la station.
    pub fn get_http_port(&self) -> u16 {
        match self.get_value("server.port") {
            Ok(Value::Number(n)) => n.as_u64().map(|p| p as u16).unwrap_or(DEFAULT_HTTP_PORT),
            _ => DEFAULT_HTTP_PORT,
        }
    }

    /// Adresse d'écoute du serveur HTTP.
    pub fn get_bind_address(&self) -> String {
        match self.get_value("server.bind") {
            Ok(Value::String(s)) => s,
            _ => DEFAULT_BIND_ADDRESS.to_string(),
        }
    }

    /// Binaire ffmpeg à utiliser pour le mixeur et les transcodeurs.
    pub fn get_ffmpeg_path(&self) -> String {
        match self.get_value("transcoder.ffmpeg") {
            Ok(Value::String(s)) => s,
            _ => DEFAULT_FFMPEG_PATH.to_string(),
        }
    }

    /// Binaire yt-dlp à utiliser pour la résolution des pistes.
    pub fn get_ytdlp_path(&self) -> String {
        match self.get_value("source.ytdlp") {
            Ok(Value::String(s)) => s,
            _ => DEFAULT_YTDLP_PATH.to_string(),
        }
    }
}

/// Fusionne récursivement `other` dans `base`.
fn merge_yaml(base: &mut Value, other: &Value) {
    match (base, other) {
        (Value::Mapping(base_map), Value::Mapping(other_map)) => {
            for (key, other_value) in other_map {
                match base_map.get_mut(key) {
                    Some(base_value) => merge_yaml(base_value, other_value),
                    None => {
                        base_map.insert(key.clone(), other_value.clone());
                    }
                }
            }
        }
        (base, other) => *base = other.clone(),
    }
}
