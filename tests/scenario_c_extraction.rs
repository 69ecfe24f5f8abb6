use std::fs::File;
use std::io::Write;
use std::path::Path;

use lmcp_lib::core::cluster::ClusterDefinition;
use lmcp_lib::core::extract::{ArtifactRegistry, ExtractionWarning, Extractor};
use lmcp_lib::core::template::{CoreKind, DependencyKind, TemplateResolver};
use zip::write::SimpleFileOptions;

const REGISTRY: &str = r#"
[[artifact]]
name = "Lithium"
prefix = "lithium-fabric-mc1.20.1-"
source = "https://cdn.modrinth.test/lithium/{version}/lithium-fabric-mc1.20.1-{version}.jar"
"#;

fn jar(path: &Path, files: &[(&str, &str)]) {
    let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
    for (entry, content) in files {
        writer.start_file(*entry, SimpleFileOptions::default()).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap();
}

fn fabric_server(root: &Path) {
    std::fs::create_dir_all(root.join("mods")).unwrap();
    jar(
        &root.join("fabric-server-mc.1.20.1-loader.0.15.7-launcher.1.0.0.jar"),
        &[(
            "META-INF/MANIFEST.MF",
            "Main-Class: net.fabricmc.loader.impl.launch.server.FabricServerLauncher\n",
        )],
    );
    jar(
        &root.join("mods/lithium-fabric-mc1.20.1-0.11.2.jar"),
        &[("fabric.mod.json", r#"{"id": "lithium", "version": "0.11.2"}"#)],
    );
    jar(
        &root.join("mods/mystery-mod.jar"),
        &[("fabric.mod.json", r#"{"id": "mystery"}"#)],
    );
}

#[test]
fn unrecognized_mod_is_omitted_with_exactly_one_warning() {
    let dir = tempfile::tempdir().unwrap();
    let server = dir.path().join("modded");
    fabric_server(&server);

    let registry = ArtifactRegistry::from_toml(REGISTRY).unwrap();
    let extraction = Extractor::new(&registry).extract(&server).unwrap();
    let template = extraction.template;

    assert_eq!(template.name, "modded");
    assert_eq!(template.core.kind, CoreKind::Fabric);
    assert_eq!(template.core.version, "1.20.1");
    assert!(template.core.source.as_deref().unwrap().starts_with("file://"));
    assert!(template.core.checksum.as_deref().unwrap().starts_with("sha256:"));

    assert_eq!(template.dependencies.len(), 1);
    let lithium = &template.dependencies[0];
    assert_eq!(lithium.name, "Lithium");
    assert_eq!(lithium.version, "0.11.2");
    assert_eq!(lithium.kind, DependencyKind::Mod);
    assert_eq!(
        lithium.source.as_deref(),
        Some("https://cdn.modrinth.test/lithium/0.11.2/lithium-fabric-mc1.20.1-0.11.2.jar")
    );

    assert_eq!(extraction.warnings.len(), 1, "{:?}", extraction.warnings);
    match &extraction.warnings[0] {
        ExtractionWarning::UnrecognizedArtifact { path, .. } => {
            assert_eq!(path.file_name().unwrap(), "mystery-mod.jar");
        }
        other => panic!("unexpected warning {:?}", other),
    }
    assert!(extraction.warnings[0].to_string().contains("mystery-mod.jar"));
}

#[test]
fn extracted_template_resolves_back_into_a_plan() {
    let dir = tempfile::tempdir().unwrap();
    let server = dir.path().join("modded");
    fabric_server(&server);

    let registry = ArtifactRegistry::from_toml(REGISTRY).unwrap();
    let mut template = Extractor::new(&registry).extract(&server).unwrap().template;
    template.java = Some("java17".into());

    let cluster = ClusterDefinition::new("demo", "velocity", "velocity.toml")
        .with_backend("modded", "modded.toml")
        .with_image("java17", "eclipse-temurin:17-jre");
    let plan = TemplateResolver::new(&cluster)
        .resolve(&template, "modded")
        .unwrap();

    assert_eq!(plan.artifacts.len(), 1);
    assert_eq!(
        plan.artifacts[0].placement,
        Path::new("mods/Lithium-0.11.2.jar")
    );
}
