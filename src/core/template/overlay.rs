use std::fmt;

use serde::{Deserialize, Serialize};

use super::model::CoreKind;

/// Config files a template may overlay. Anything else is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OverlayFile {
    #[serde(rename = "server.properties")]
    ServerProperties,
    #[serde(rename = "velocity.toml")]
    VelocityToml,
    #[serde(rename = "bukkit.yml")]
    BukkitYml,
    #[serde(rename = "spigot.yml")]
    SpigotYml,
    #[serde(rename = "paper-global.yml")]
    PaperGlobalYml,
}

/// On-disk syntax of a generated file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Properties,
    Toml,
    Yaml,
}

impl OverlayFile {
    pub const ALL: [OverlayFile; 5] = [
        OverlayFile::ServerProperties,
        OverlayFile::VelocityToml,
        OverlayFile::BukkitYml,
        OverlayFile::SpigotYml,
        OverlayFile::PaperGlobalYml,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            OverlayFile::ServerProperties => "server.properties",
            OverlayFile::VelocityToml => "velocity.toml",
            OverlayFile::BukkitYml => "bukkit.yml",
            OverlayFile::SpigotYml => "spigot.yml",
            OverlayFile::PaperGlobalYml => "paper-global.yml",
        }
    }

    /// Path of the file relative to the server's config subtree.
    pub fn relative_path(&self) -> &'static str {
        match self {
            OverlayFile::PaperGlobalYml => "config/paper-global.yml",
            other => other.file_name(),
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.file_name() == name)
    }

    pub fn format(&self) -> ConfigFormat {
        match self {
            OverlayFile::ServerProperties => ConfigFormat::Properties,
            OverlayFile::VelocityToml => ConfigFormat::Toml,
            OverlayFile::BukkitYml | OverlayFile::SpigotYml | OverlayFile::PaperGlobalYml => {
                ConfigFormat::Yaml
            }
        }
    }

    /// Whether a server of `kind` reads this file at all.
    pub fn applies_to(&self, kind: CoreKind) -> bool {
        match self {
            OverlayFile::VelocityToml => kind == CoreKind::Velocity,
            OverlayFile::ServerProperties => kind != CoreKind::Velocity,
            OverlayFile::BukkitYml | OverlayFile::SpigotYml | OverlayFile::PaperGlobalYml => {
                matches!(kind, CoreKind::Paper | CoreKind::Purpur)
            }
        }
    }

    pub fn recognized_keys(&self) -> &'static [&'static str] {
        match self {
            OverlayFile::ServerProperties => SERVER_PROPERTIES_KEYS,
            OverlayFile::VelocityToml => VELOCITY_KEYS,
            OverlayFile::BukkitYml => BUKKIT_KEYS,
            OverlayFile::SpigotYml => SPIGOT_KEYS,
            OverlayFile::PaperGlobalYml => PAPER_GLOBAL_KEYS,
        }
    }

    /// Keys written from the network allocation. Overlays may not set them.
    pub fn managed_keys(&self) -> &'static [&'static str] {
        match self {
            OverlayFile::ServerProperties => &["server-ip", "server-port", "online-mode"],
            OverlayFile::VelocityToml => &[
                "bind",
                "player-info-forwarding-mode",
                "forwarding-secret-file",
                "servers",
                "forced-hosts",
            ],
            OverlayFile::BukkitYml => &[],
            OverlayFile::SpigotYml => &["settings.bungeecord"],
            OverlayFile::PaperGlobalYml => &[
                "proxies.velocity.enabled",
                "proxies.velocity.online-mode",
                "proxies.velocity.secret",
            ],
        }
    }

    pub fn recognizes(&self, key: &str) -> bool {
        self.recognized_keys().contains(&key)
    }

    pub fn is_managed(&self, key: &str) -> bool {
        self.managed_keys()
            .iter()
            .any(|m| key == *m || key.starts_with(&format!("{}.", m)))
    }
}

impl fmt::Display for OverlayFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

const SERVER_PROPERTIES_KEYS: &[&str] = &[
    "allow-flight",
    "allow-nether",
    "difficulty",
    "enable-command-block",
    "enforce-whitelist",
    "force-gamemode",
    "gamemode",
    "generate-structures",
    "hardcore",
    "level-name",
    "level-seed",
    "level-type",
    "max-players",
    "max-world-size",
    "motd",
    "network-compression-threshold",
    "player-idle-timeout",
    "pvp",
    "simulation-distance",
    "spawn-animals",
    "spawn-monsters",
    "spawn-npcs",
    "spawn-protection",
    "view-distance",
    "white-list",
];

const VELOCITY_KEYS: &[&str] = &[
    "advanced.compression-level",
    "advanced.compression-threshold",
    "advanced.connection-timeout",
    "advanced.login-ratelimit",
    "advanced.read-timeout",
    "announce-forge",
    "enable-player-address-logging",
    "force-key-authentication",
    "kick-existing-players",
    "motd",
    "online-mode",
    "ping-passthrough",
    "prevent-client-proxy-connections",
    "query.enabled",
    "show-max-players",
];

const BUKKIT_KEYS: &[&str] = &[
    "settings.allow-end",
    "settings.connection-throttle",
    "settings.warn-on-overload",
    "spawn-limits.ambient",
    "spawn-limits.animals",
    "spawn-limits.monsters",
    "spawn-limits.water-animals",
    "ticks-per.autosave",
];

const SPIGOT_KEYS: &[&str] = &[
    "settings.restart-on-crash",
    "settings.save-user-cache-on-stop-only",
    "world-settings.default.entity-activation-range.monsters",
    "world-settings.default.mob-spawn-range",
    "world-settings.default.simulation-distance",
    "world-settings.default.view-distance",
];

const PAPER_GLOBAL_KEYS: &[&str] = &[
    "chunk-loading-basic.player-max-chunk-load-rate",
    "chunk-loading-basic.player-max-concurrent-chunk-loads",
    "chunk-system.worker-threads",
    "messages.kick.authentication-servers-down",
    "misc.max-joins-per-tick",
    "timings.enabled",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_round_trip() {
        for file in OverlayFile::ALL {
            assert_eq!(OverlayFile::parse(file.file_name()), Some(file));
        }
        assert_eq!(OverlayFile::parse("ops.json"), None);
    }

    #[test]
    fn managed_keys_cover_nested_tables() {
        assert!(OverlayFile::VelocityToml.is_managed("servers.lobby"));
        assert!(OverlayFile::ServerProperties.is_managed("server-port"));
        assert!(!OverlayFile::ServerProperties.is_managed("motd"));
    }

    #[test]
    fn proxy_and_backend_files_do_not_overlap() {
        assert!(OverlayFile::VelocityToml.applies_to(CoreKind::Velocity));
        assert!(!OverlayFile::ServerProperties.applies_to(CoreKind::Velocity));
        assert!(OverlayFile::PaperGlobalYml.applies_to(CoreKind::Purpur));
        assert!(!OverlayFile::PaperGlobalYml.applies_to(CoreKind::Fabric));
    }
}
