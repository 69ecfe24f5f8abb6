// ─── lmcp Core ───
// Build and orchestration engine for a Velocity proxy plus backend servers.
//
// Architecture:
//   core/
//     template/     Template model, overlays, resolver → BuildPlan
//     artifact/     Content-addressed cache, sources, single-flight fetcher
//     maven/        Maven coordinates and POM metadata
//     network/      Port + forwarding-secret allocator (network.json)
//     synth/        Config synthesis and atomic commit into config/
//     instance/     Server instance model + lifecycle state machine
//     runtime/      Container runtime trait, compose and in-memory backends
//     orchestrator/ build / up / down / remove
//     extract/      Server directory → Template
//     monitor/      Read-only status snapshots
//     state/        Workspace paths
//     config/       lmcp.yaml load / save / init

pub mod artifact;
pub mod cluster;
pub mod config;
pub mod error;
pub mod extract;
pub mod http;
pub mod instance;
pub mod logs;
pub mod maven;
pub mod monitor;
pub mod network;
pub mod orchestrator;
pub mod runtime;
pub mod state;
pub mod synth;
pub mod template;
