// ─── Server-core defaults ───
// Lowest layer of every synthesized file. Values match what each core writes
// on first start, so extraction can diff against the same table.

use std::collections::BTreeMap;

use crate::core::template::{CoreKind, OverlayFile, OverlayValue};

fn table(entries: &[(&str, OverlayValue)]) -> BTreeMap<String, OverlayValue> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn s(value: &str) -> OverlayValue {
    OverlayValue::String(value.to_string())
}

fn i(value: i64) -> OverlayValue {
    OverlayValue::Integer(value)
}

fn b(value: bool) -> OverlayValue {
    OverlayValue::Bool(value)
}

/// Vanilla `server.properties` as written by a fresh 1.20 server.
pub fn server_properties() -> BTreeMap<String, OverlayValue> {
    table(&[
        ("allow-flight", b(false)),
        ("allow-nether", b(true)),
        ("broadcast-console-to-ops", b(true)),
        ("broadcast-rcon-to-ops", b(true)),
        ("difficulty", s("easy")),
        ("enable-command-block", b(false)),
        ("enable-jmx-monitoring", b(false)),
        ("enable-query", b(false)),
        ("enable-rcon", b(false)),
        ("enable-status", b(true)),
        ("enforce-secure-profile", b(true)),
        ("enforce-whitelist", b(false)),
        ("entity-broadcast-range-percentage", i(100)),
        ("force-gamemode", b(false)),
        ("function-permission-level", i(2)),
        ("gamemode", s("survival")),
        ("generate-structures", b(true)),
        ("generator-settings", s("{}")),
        ("hardcore", b(false)),
        ("hide-online-players", b(false)),
        ("level-name", s("world")),
        ("level-seed", s("")),
        ("level-type", s("minecraft:normal")),
        ("max-chained-neighbor-updates", i(1000000)),
        ("max-players", i(20)),
        ("max-tick-time", i(60000)),
        ("max-world-size", i(29999984)),
        ("motd", s("A Minecraft Server")),
        ("network-compression-threshold", i(256)),
        ("online-mode", b(true)),
        ("op-permission-level", i(4)),
        ("player-idle-timeout", i(0)),
        ("prevent-proxy-connections", b(false)),
        ("pvp", b(true)),
        ("query.port", i(25565)),
        ("rate-limit", i(0)),
        ("rcon.password", s("")),
        ("rcon.port", i(25575)),
        ("require-resource-pack", b(false)),
        ("resource-pack", s("")),
        ("resource-pack-prompt", s("")),
        ("resource-pack-sha1", s("")),
        ("server-ip", s("")),
        ("server-port", i(25565)),
        ("simulation-distance", i(10)),
        ("spawn-animals", b(true)),
        ("spawn-monsters", b(true)),
        ("spawn-npcs", b(true)),
        ("spawn-protection", i(16)),
        ("sync-chunk-writes", b(true)),
        ("use-native-transport", b(true)),
        ("view-distance", i(10)),
        ("white-list", b(false)),
    ])
}

/// Flattened (dotted-key) `velocity.toml` defaults.
pub fn velocity_toml() -> BTreeMap<String, OverlayValue> {
    table(&[
        ("config-version", s("2.7")),
        ("bind", s("0.0.0.0:25565")),
        ("motd", s("<#09add3>A Velocity Server")),
        ("show-max-players", i(500)),
        ("online-mode", b(true)),
        ("force-key-authentication", b(true)),
        ("prevent-client-proxy-connections", b(false)),
        ("player-info-forwarding-mode", s("none")),
        ("forwarding-secret-file", s("forwarding.secret")),
        ("announce-forge", b(false)),
        ("kick-existing-players", b(false)),
        ("ping-passthrough", s("DISABLED")),
        ("enable-player-address-logging", b(true)),
        ("advanced.compression-threshold", i(256)),
        ("advanced.compression-level", i(-1)),
        ("advanced.login-ratelimit", i(3000)),
        ("advanced.connection-timeout", i(5000)),
        ("advanced.read-timeout", i(30000)),
        ("query.enabled", b(false)),
        ("query.port", i(25565)),
    ])
}

/// Defaults for `file` on a server of `kind`. Files without a meaningful
/// default layer start empty.
pub fn defaults_for(file: OverlayFile, kind: CoreKind) -> BTreeMap<String, OverlayValue> {
    if !file.applies_to(kind) {
        return BTreeMap::new();
    }
    match file {
        OverlayFile::ServerProperties => server_properties(),
        OverlayFile::VelocityToml => velocity_toml(),
        OverlayFile::SpigotYml => table(&[("settings.bungeecord", b(false))]),
        OverlayFile::BukkitYml | OverlayFile::PaperGlobalYml => BTreeMap::new(),
    }
}

/// Files always written for a core, overlays or not.
pub fn always_written(kind: CoreKind) -> &'static [OverlayFile] {
    match kind {
        CoreKind::Velocity => &[OverlayFile::VelocityToml],
        CoreKind::Paper | CoreKind::Purpur => &[
            OverlayFile::ServerProperties,
            OverlayFile::SpigotYml,
            OverlayFile::PaperGlobalYml,
        ],
        CoreKind::Fabric | CoreKind::Vanilla => &[OverlayFile::ServerProperties],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognized_property_keys_have_defaults() {
        let defaults = server_properties();
        for key in OverlayFile::ServerProperties.recognized_keys() {
            assert!(defaults.contains_key(*key), "no default for {}", key);
        }
    }

    #[test]
    fn proxy_files_do_not_leak_to_backends() {
        assert!(defaults_for(OverlayFile::VelocityToml, CoreKind::Paper).is_empty());
        assert!(!defaults_for(OverlayFile::ServerProperties, CoreKind::Fabric).is_empty());
    }
}
