use std::collections::BTreeMap;

use crate::core::cluster::{ClusterDefinition, ServerRole};
use crate::core::error::{LmcpError, LmcpResult};
use crate::core::instance::ServerInstance;
use crate::core::runtime::{PortBinding, ServiceSpec, VolumeMount};
use crate::core::synth::{CONTAINER_GAME_PORT, FILE_LIST};
use crate::core::template::CORE_JAR;

const DATA_MOUNT: &str = "/data";
const CONFIG_MOUNT: &str = "/config";

/// Container definition for a built instance.
///
/// `state/` is the writable data volume. `config/` is mounted read-only and
/// copied over the data directory on every start, so the synthesized files
/// always win over whatever the server rewrote at runtime. Files the previous
/// copy put there are deleted first, so plugins dropped from the template do
/// not linger in the data volume.
pub fn service_spec(cluster: &ClusterDefinition, instance: &ServerInstance) -> LmcpResult<ServiceSpec> {
    let image = instance.image.clone().ok_or_else(|| {
        LmcpError::Other(format!("server '{}' has no image recorded; rebuild it", instance.name))
    })?;
    let allocation = instance.allocation.as_ref().ok_or_else(|| {
        LmcpError::Other(format!(
            "server '{}' has no network allocation; rebuild it",
            instance.name
        ))
    })?;

    let ports = allocation
        .primary_port()
        .map(|host| PortBinding {
            host,
            container: CONTAINER_GAME_PORT,
        })
        .into_iter()
        .collect();

    let memory = instance.resources.memory_mb;
    let nogui = match instance.role {
        ServerRole::Proxy => "",
        ServerRole::Backend => " nogui",
    };
    let launch = format!(
        "if [ -f {data}/{list} ]; then \
         while IFS= read -r f; do rm -f \"{data}/$f\"; done < {data}/{list}; fi && \
         cp -r {cfg}/. {data}/ && cd {data} && \
         exec java -Xms{mem}M -Xmx{mem}M -jar {jar}{nogui}",
        list = FILE_LIST,
        cfg = CONFIG_MOUNT,
        data = DATA_MOUNT,
        mem = memory,
        jar = CORE_JAR,
        nogui = nogui,
    );

    let mut env = BTreeMap::new();
    env.insert("EULA".to_string(), "TRUE".to_string());
    env.insert("LMCP_SERVER".to_string(), instance.name.clone());
    env.insert("LMCP_ROLE".to_string(), instance.role.to_string());
    env.insert("LMCP_MEMORY_MB".to_string(), memory.to_string());

    Ok(ServiceSpec {
        name: instance.name.clone(),
        container_name: cluster.container_name(&instance.name),
        image,
        env,
        ports,
        volumes: vec![
            VolumeMount {
                host: instance.state_dir(),
                container: DATA_MOUNT.into(),
                read_only: false,
            },
            VolumeMount {
                host: instance.config_dir(),
                container: CONFIG_MOUNT.into(),
                read_only: true,
            },
        ],
        command: vec!["sh".into(), "-c".into(), launch],
        memory_mb: Some(memory),
        cpus: instance.resources.cpus,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::network::NetworkAllocation;
    use chrono::Utc;
    use std::path::Path;

    #[test]
    fn backend_service_maps_allocation_and_volumes() {
        let cluster = ClusterDefinition::new("Demo", "velocity", "velocity.toml")
            .with_backend("survival", "survival.toml");
        let mut instance =
            ServerInstance::new("survival", ServerRole::Backend, "survival.toml", Path::new("/srv"));
        instance.image = Some("eclipse-temurin:17-jre".into());
        instance.allocation = Some(NetworkAllocation {
            server: "survival".into(),
            ports: vec![25567],
            forwarding_secret: Some("ab".repeat(32)),
            hostname: "demo-survival".into(),
            fixed: false,
            allocated_at: Utc::now(),
        });

        let spec = service_spec(&cluster, &instance).unwrap();
        assert_eq!(spec.container_name, "demo-survival");
        assert_eq!(
            spec.ports,
            vec![PortBinding {
                host: 25567,
                container: 25565
            }]
        );
        assert_eq!(spec.volumes[0].host, Path::new("/srv/survival/state"));
        assert!(spec.volumes[1].read_only);
        assert!(spec.command[2].ends_with("-jar server.jar nogui"));
        // Stale copies are cleared before the config tree is copied in.
        let launch = &spec.command[2];
        let clear = launch.find("rm -f \"/data/$f\"").unwrap();
        let copy = launch.find("cp -r /config/. /data/").unwrap();
        assert!(clear < copy);
        assert!(launch.contains("< /data/.lmcp-files"));
    }

    #[test]
    fn unbuilt_instance_has_no_service() {
        let cluster = ClusterDefinition::new("Demo", "velocity", "velocity.toml");
        let instance =
            ServerInstance::new("velocity", ServerRole::Proxy, "velocity.toml", Path::new("/srv"));
        assert!(service_spec(&cluster, &instance).is_err());
    }
}
