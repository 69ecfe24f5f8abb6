use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{ContainerRuntime, ContainerState, ContainerStatus, ServiceSpec};
use crate::core::error::RuntimeError;

/// One call observed by [`MemoryRuntime`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Define(String),
    Start(String),
    Stop(String),
    Status(String),
    Logs(String),
    Remove(String),
    Teardown,
}

#[derive(Default)]
struct Inner {
    calls: Vec<RuntimeCall>,
    services: BTreeMap<String, ServiceSpec>,
    states: BTreeMap<String, ContainerState>,
    logs: HashMap<String, Vec<String>>,
    /// (operation, service) → message returned instead of succeeding.
    failures: HashMap<(String, String), String>,
}

/// In-process runtime that records every call.
#[derive(Default)]
pub struct MemoryRuntime {
    inner: Mutex<Inner>,
}

impl MemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `operation` (`define`, `start`, `stop`, `status`, `logs`,
    /// `remove`, `teardown`) fail for `service` with `message`.
    pub fn fail_on(&self, operation: &str, service: &str, message: &str) {
        self.lock()
            .failures
            .insert((operation.to_string(), service.to_string()), message.to_string());
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    pub fn push_log(&self, service: &str, line: &str) {
        self.lock()
            .logs
            .entry(service.to_string())
            .or_default()
            .push(line.to_string());
    }

    /// Force the reported state, e.g. to simulate a crashed container.
    pub fn set_state(&self, service: &str, state: ContainerState) {
        self.lock().states.insert(service.to_string(), state);
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.lock().calls.clone()
    }

    pub fn defined(&self, service: &str) -> Option<ServiceSpec> {
        self.lock().services.get(service).cloned()
    }

    pub fn state(&self, service: &str) -> ContainerState {
        self.lock()
            .states
            .get(service)
            .cloned()
            .unwrap_or(ContainerState::Missing)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panicking test thread must not wedge the others.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, call: RuntimeCall, operation: &str, service: &str) -> Result<(), RuntimeError> {
        let mut inner = self.lock();
        inner.calls.push(call);
        match inner
            .failures
            .get(&(operation.to_string(), service.to_string()))
        {
            Some(message) => Err(RuntimeError::new(service, operation, message.clone())),
            None => Ok(()),
        }
    }

    fn require_defined(&self, service: &str, operation: &str) -> Result<(), RuntimeError> {
        if self.lock().services.contains_key(service) {
            Ok(())
        } else {
            Err(RuntimeError::new(
                service,
                operation,
                format!("no such service: {}", service),
            ))
        }
    }
}

#[async_trait]
impl ContainerRuntime for MemoryRuntime {
    async fn define_service(&self, spec: ServiceSpec) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::Define(spec.name.clone()), "define", &spec.name)?;
        let mut inner = self.lock();
        inner
            .states
            .entry(spec.name.clone())
            .or_insert(ContainerState::Created);
        inner.services.insert(spec.name.clone(), spec);
        Ok(())
    }

    async fn start(&self, service: &str) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::Start(service.to_string()), "start", service)?;
        self.require_defined(service, "start")?;
        self.set_state(service, ContainerState::Running);
        Ok(())
    }

    async fn stop(&self, service: &str) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::Stop(service.to_string()), "stop", service)?;
        self.require_defined(service, "stop")?;
        self.set_state(service, ContainerState::Exited(Some(0)));
        Ok(())
    }

    async fn status(&self, service: &str) -> Result<ContainerStatus, RuntimeError> {
        self.record(RuntimeCall::Status(service.to_string()), "status", service)?;
        let state = self.state(service);
        let mut status = ContainerStatus::new(service, state);
        if status.state == ContainerState::Running {
            status.cpu_percent = Some(0.0);
            status.memory_bytes = Some(0);
        }
        Ok(status)
    }

    async fn logs(&self, service: &str, tail: usize) -> Result<Vec<String>, RuntimeError> {
        self.record(RuntimeCall::Logs(service.to_string()), "logs", service)?;
        let inner = self.lock();
        let lines = inner.logs.get(service).cloned().unwrap_or_default();
        let skip = lines.len().saturating_sub(tail);
        Ok(lines.into_iter().skip(skip).collect())
    }

    async fn remove(&self, service: &str) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::Remove(service.to_string()), "remove", service)?;
        let mut inner = self.lock();
        inner.services.remove(service);
        inner.states.remove(service);
        Ok(())
    }

    async fn teardown(&self) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::Teardown, "teardown", "*")?;
        let mut inner = self.lock();
        for state in inner.states.values_mut() {
            *state = ContainerState::Exited(Some(0));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> ServiceSpec {
        ServiceSpec {
            name: name.into(),
            container_name: format!("demo-{}", name),
            image: "eclipse-temurin:17-jre".into(),
            env: BTreeMap::new(),
            ports: vec![],
            volumes: vec![],
            command: vec![],
            memory_mb: None,
            cpus: None,
        }
    }

    #[tokio::test]
    async fn start_requires_definition() {
        let runtime = MemoryRuntime::new();
        assert!(runtime.start("lobby").await.is_err());

        runtime.define_service(spec("lobby")).await.unwrap();
        runtime.start("lobby").await.unwrap();
        assert_eq!(runtime.state("lobby"), ContainerState::Running);
        assert_eq!(
            runtime.calls(),
            vec![
                RuntimeCall::Start("lobby".into()),
                RuntimeCall::Define("lobby".into()),
                RuntimeCall::Start("lobby".into()),
            ]
        );
    }

    #[tokio::test]
    async fn injected_failures_carry_the_message() {
        let runtime = MemoryRuntime::new();
        runtime.define_service(spec("lobby")).await.unwrap();
        runtime.fail_on("start", "lobby", "port is already allocated");

        let err = runtime.start("lobby").await.unwrap_err();
        assert_eq!(err.message, "port is already allocated");
        assert_eq!(runtime.state("lobby"), ContainerState::Created);
    }

    #[tokio::test]
    async fn logs_are_tailed() {
        let runtime = MemoryRuntime::new();
        for i in 0..5 {
            runtime.push_log("lobby", &format!("line {}", i));
        }
        let lines = runtime.logs("lobby", 2).await.unwrap();
        assert_eq!(lines, vec!["line 3", "line 4"]);
    }
}
