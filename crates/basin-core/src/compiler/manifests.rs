// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared docker-compose and Kubernetes manifest builders.
//!
//! Both engines describe their node layout as [`ServiceDef`]s and workload
//! parameters; the builders here turn those into YAML text. All output is
//! hand-rendered line by line so it stays byte-deterministic.

use std::fmt::Write as _;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

/// One docker-compose service.
#[derive(Debug, Clone, Default)]
pub(crate) struct ServiceDef {
    pub name: String,
    pub image: String,
    pub command: Option<String>,
    /// Plain environment variables.
    pub environment: Vec<(String, String)>,
    /// `(host, container)` port pairs.
    pub ports: Vec<(i64, i64)>,
    /// Volume entries verbatim; named-volume sources (no '/' or '.') are
    /// collected into the top-level `volumes:` section.
    pub volumes: Vec<String>,
    /// Shell healthcheck command, rendered as CMD-SHELL.
    pub healthcheck: Option<String>,
    pub depends_on: Vec<String>,
}

/// Render a docker-compose file from the given services, in order.
pub(crate) fn render_compose(services: &[ServiceDef]) -> String {
    let mut out = String::new();
    out.push_str("services:\n");

    for service in services {
        let _ = writeln!(out, "  {}:", service.name);
        let _ = writeln!(out, "    image: {}", service.image);
        if let Some(command) = &service.command {
            let _ = writeln!(out, "    command: {}", command);
        }
        if !service.environment.is_empty() {
            out.push_str("    environment:\n");
            for (key, value) in &service.environment {
                let _ = writeln!(out, "      {}: \"{}\"", key, value);
            }
        }
        if !service.ports.is_empty() {
            out.push_str("    ports:\n");
            for (host, container) in &service.ports {
                let _ = writeln!(out, "      - \"{}:{}\"", host, container);
            }
        }
        if !service.volumes.is_empty() {
            out.push_str("    volumes:\n");
            for volume in &service.volumes {
                let _ = writeln!(out, "      - {}", volume);
            }
        }
        if let Some(healthcheck) = &service.healthcheck {
            out.push_str("    healthcheck:\n");
            let _ = writeln!(out, "      test: [\"CMD-SHELL\", \"{}\"]", healthcheck);
            out.push_str("      interval: 10s\n");
            out.push_str("      timeout: 5s\n");
            out.push_str("      retries: 5\n");
        }
        if !service.depends_on.is_empty() {
            out.push_str("    depends_on:\n");
            for dep in &service.depends_on {
                let _ = writeln!(out, "      - {}", dep);
            }
        }
    }

    let named: Vec<&str> = services
        .iter()
        .flat_map(|s| s.volumes.iter())
        .filter_map(|v| v.split(':').next())
        .filter(|source| !source.contains('/') && !source.starts_with('.'))
        .collect();
    if !named.is_empty() {
        out.push_str("volumes:\n");
        for volume in named {
            let _ = writeln!(out, "  {}: {{}}", volume);
        }
    }

    out
}

/// Render a ConfigMap embedding the given files as block scalars.
pub(crate) fn render_configmap(name: &str, files: &[(&str, &str)]) -> String {
    let mut out = String::new();
    out.push_str("apiVersion: v1\n");
    out.push_str("kind: ConfigMap\n");
    out.push_str("metadata:\n");
    let _ = writeln!(out, "  name: {}-config", name);
    out.push_str("data:\n");
    for (file, content) in files {
        let _ = writeln!(out, "  {}: |", file);
        for line in content.lines() {
            if line.is_empty() {
                out.push('\n');
            } else {
                let _ = writeln!(out, "    {}", line);
            }
        }
    }
    out
}

/// Render a Secret; values are base64-encoded.
pub(crate) fn render_secret(name: &str, entries: &[(&str, &str)]) -> String {
    let mut out = String::new();
    out.push_str("apiVersion: v1\n");
    out.push_str("kind: Secret\n");
    out.push_str("metadata:\n");
    let _ = writeln!(out, "  name: {}-secret", name);
    out.push_str("type: Opaque\n");
    out.push_str("data:\n");
    for (key, value) in entries {
        let _ = writeln!(out, "  {}: {}", key, BASE64.encode(value));
    }
    out
}

/// Parameters for the StatefulSet builder.
#[derive(Debug, Clone)]
pub(crate) struct WorkloadParams<'a> {
    pub name: &'a str,
    pub image: &'a str,
    pub replicas: i64,
    pub port: i64,
    /// Container command; the image entrypoint when absent.
    pub command: Option<Vec<String>>,
    /// Plain environment variables.
    pub env: Vec<(String, String)>,
    /// Environment variables sourced from `<name>-secret`, as
    /// `(variable, secret key)` pairs.
    pub secret_env: Vec<(String, String)>,
    pub config_mount_path: &'a str,
    pub data_mount_path: &'a str,
    pub storage_gb: i64,
    /// Shell readiness probe command.
    pub probe_command: &'a str,
    /// Request the encrypted storage class for the data volume.
    pub encrypted_storage: bool,
}

/// Render the StatefulSet carrying all nodes of the deployment.
pub(crate) fn render_workload(p: &WorkloadParams<'_>) -> String {
    let mut out = String::new();
    out.push_str("apiVersion: apps/v1\n");
    out.push_str("kind: StatefulSet\n");
    out.push_str("metadata:\n");
    let _ = writeln!(out, "  name: {}", p.name);
    out.push_str("  labels:\n");
    let _ = writeln!(out, "    app: {}", p.name);
    out.push_str("spec:\n");
    let _ = writeln!(out, "  serviceName: {}", p.name);
    let _ = writeln!(out, "  replicas: {}", p.replicas);
    out.push_str("  selector:\n");
    out.push_str("    matchLabels:\n");
    let _ = writeln!(out, "      app: {}", p.name);
    out.push_str("  template:\n");
    out.push_str("    metadata:\n");
    out.push_str("      labels:\n");
    let _ = writeln!(out, "        app: {}", p.name);
    out.push_str("    spec:\n");
    out.push_str("      containers:\n");
    let _ = writeln!(out, "        - name: {}", p.name);
    let _ = writeln!(out, "          image: {}", p.image);
    if let Some(command) = &p.command {
        out.push_str("          command:\n");
        for part in command {
            let _ = writeln!(out, "            - \"{}\"", part);
        }
    }
    out.push_str("          ports:\n");
    let _ = writeln!(out, "            - containerPort: {}", p.port);
    if !p.env.is_empty() || !p.secret_env.is_empty() {
        out.push_str("          env:\n");
        for (key, value) in &p.env {
            let _ = writeln!(out, "            - name: {}", key);
            let _ = writeln!(out, "              value: \"{}\"", value);
        }
        for (key, secret_key) in &p.secret_env {
            let _ = writeln!(out, "            - name: {}", key);
            out.push_str("              valueFrom:\n");
            out.push_str("                secretKeyRef:\n");
            let _ = writeln!(out, "                  name: {}-secret", p.name);
            let _ = writeln!(out, "                  key: {}", secret_key);
        }
    }
    out.push_str("          volumeMounts:\n");
    out.push_str("            - name: config\n");
    let _ = writeln!(out, "              mountPath: {}", p.config_mount_path);
    out.push_str("              readOnly: true\n");
    out.push_str("            - name: data\n");
    let _ = writeln!(out, "              mountPath: {}", p.data_mount_path);
    out.push_str("          readinessProbe:\n");
    out.push_str("            exec:\n");
    let _ = writeln!(
        out,
        "              command: [\"/bin/sh\", \"-c\", \"{}\"]",
        p.probe_command
    );
    out.push_str("            initialDelaySeconds: 5\n");
    out.push_str("            periodSeconds: 10\n");
    out.push_str("      volumes:\n");
    out.push_str("        - name: config\n");
    out.push_str("          configMap:\n");
    let _ = writeln!(out, "            name: {}-config", p.name);
    out.push_str("  volumeClaimTemplates:\n");
    out.push_str("    - metadata:\n");
    out.push_str("        name: data\n");
    out.push_str("      spec:\n");
    out.push_str("        accessModes: [\"ReadWriteOnce\"]\n");
    let storage_class = if p.encrypted_storage {
        "encrypted-ssd"
    } else {
        "standard"
    };
    let _ = writeln!(out, "        storageClassName: {}", storage_class);
    out.push_str("        resources:\n");
    out.push_str("          requests:\n");
    let _ = writeln!(out, "            storage: {}Gi", p.storage_gb);
    out
}

/// Render the headless Service fronting the StatefulSet.
pub(crate) fn render_service(name: &str, port: i64) -> String {
    let mut out = String::new();
    out.push_str("apiVersion: v1\n");
    out.push_str("kind: Service\n");
    out.push_str("metadata:\n");
    let _ = writeln!(out, "  name: {}", name);
    out.push_str("spec:\n");
    out.push_str("  clusterIP: None\n");
    out.push_str("  selector:\n");
    let _ = writeln!(out, "    app: {}", name);
    out.push_str("  ports:\n");
    let _ = writeln!(out, "    - port: {}", port);
    let _ = writeln!(out, "      targetPort: {}", port);
    out
}

/// Render the horizontal autoscaler for a clustered deployment.
pub(crate) fn render_autoscaler(name: &str, min_replicas: i64, max_replicas: i64) -> String {
    let mut out = String::new();
    out.push_str("apiVersion: autoscaling/v2\n");
    out.push_str("kind: HorizontalPodAutoscaler\n");
    out.push_str("metadata:\n");
    let _ = writeln!(out, "  name: {}", name);
    out.push_str("spec:\n");
    out.push_str("  scaleTargetRef:\n");
    out.push_str("    apiVersion: apps/v1\n");
    out.push_str("    kind: StatefulSet\n");
    let _ = writeln!(out, "    name: {}", name);
    let _ = writeln!(out, "  minReplicas: {}", min_replicas);
    let _ = writeln!(out, "  maxReplicas: {}", max_replicas);
    out.push_str("  metrics:\n");
    out.push_str("    - type: Resource\n");
    out.push_str("      resource:\n");
    out.push_str("        name: cpu\n");
    out.push_str("        target:\n");
    out.push_str("          type: Utilization\n");
    out.push_str("          averageUtilization: 75\n");
    out
}

/// Render the one-shot Job that runs a script from the ConfigMap after the
/// nodes come up (cluster bootstrap, replica wiring).
pub(crate) fn render_init_job(
    name: &str,
    image: &str,
    script_name: &str,
    env: &[(&str, &str)],
) -> String {
    let mut out = String::new();
    out.push_str("apiVersion: batch/v1\n");
    out.push_str("kind: Job\n");
    out.push_str("metadata:\n");
    let _ = writeln!(out, "  name: {}-init", name);
    out.push_str("spec:\n");
    out.push_str("  backoffLimit: 6\n");
    out.push_str("  template:\n");
    out.push_str("    spec:\n");
    out.push_str("      restartPolicy: OnFailure\n");
    out.push_str("      containers:\n");
    out.push_str("        - name: init\n");
    let _ = writeln!(out, "          image: {}", image);
    let _ = writeln!(
        out,
        "          command: [\"/bin/sh\", \"/config/{}\"]",
        script_name
    );
    if !env.is_empty() {
        out.push_str("          env:\n");
        for (key, value) in env {
            let _ = writeln!(out, "            - name: {}", key);
            let _ = writeln!(out, "              value: \"{}\"", value);
        }
    }
    out.push_str("          volumeMounts:\n");
    out.push_str("            - name: config\n");
    out.push_str("              mountPath: /config\n");
    out.push_str("      volumes:\n");
    out.push_str("        - name: config\n");
    out.push_str("          configMap:\n");
    let _ = writeln!(out, "            name: {}-config", name);
    out
}
