// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Backup and restore script rendering.
//!
//! Rendered as plain POSIX shell so the scripts run unchanged inside the
//! engine images. The same scripts serve the scheduled sidecar and on-demand
//! backup runs; pruning honors the retention window from the spec.

use std::fmt::Write as _;

use crate::spec::{BackupKind, BackupSpec, DatabaseKind};

/// Inputs for the backup/restore script templates.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BackupScriptParams<'a> {
    pub name: &'a str,
    /// Primary node hostname the scripts connect to.
    pub host: &'a str,
    pub port: i64,
    pub kind: DatabaseKind,
    pub backup: &'a BackupSpec,
}

/// Render `backup.sh`.
pub(crate) fn render_backup_script(p: &BackupScriptParams<'_>) -> String {
    let mut out = String::new();
    out.push_str("#!/bin/sh\n");
    let _ = writeln!(
        out,
        "# {} backup for {} (schedule: {})",
        p.backup.kind_name(),
        p.name,
        p.backup.schedule
    );
    out.push_str("set -eu\n\n");
    out.push_str("BACKUP_DIR=\"${BACKUP_DIR:-/backups}\"\n");
    out.push_str("STAMP=\"$(date +%Y%m%dT%H%M%S)\"\n");
    out.push_str("mkdir -p \"${BACKUP_DIR}\"\n\n");

    match (p.kind, p.backup.kind) {
        (DatabaseKind::Postgresql, BackupKind::Full) => {
            let _ = writeln!(
                out,
                "ARCHIVE=\"${{BACKUP_DIR}}/{}-${{STAMP}}.dump\"",
                p.name
            );
            let _ = writeln!(
                out,
                "pg_dump -h {} -p {} -U postgres -Fc -f \"${{ARCHIVE}}\" postgres",
                p.host, p.port
            );
        }
        (DatabaseKind::Postgresql, BackupKind::Incremental) => {
            let _ = writeln!(
                out,
                "ARCHIVE=\"${{BACKUP_DIR}}/{}-${{STAMP}}-base\"",
                p.name
            );
            let _ = writeln!(
                out,
                "pg_basebackup -h {} -p {} -U postgres -D \"${{ARCHIVE}}\" -Ft -X stream",
                p.host, p.port
            );
            out.push_str("tar -cf \"${ARCHIVE}.tar\" -C \"${ARCHIVE}\" .\n");
            out.push_str("rm -rf \"${ARCHIVE}\"\n");
            out.push_str("ARCHIVE=\"${ARCHIVE}.tar\"\n");
        }
        (DatabaseKind::Redis, BackupKind::Full) => {
            let _ = writeln!(out, "ARCHIVE=\"${{BACKUP_DIR}}/{}-${{STAMP}}.rdb\"", p.name);
            let _ = writeln!(
                out,
                "redis-cli -h {} -p {} --rdb \"${{ARCHIVE}}\"",
                p.host, p.port
            );
        }
        (DatabaseKind::Redis, BackupKind::Incremental) => {
            let _ = writeln!(
                out,
                "ARCHIVE=\"${{BACKUP_DIR}}/{}-${{STAMP}}-aof.tar\"",
                p.name
            );
            out.push_str("tar -cf \"${ARCHIVE}\" -C /data appendonlydir\n");
        }
    }

    if p.backup.compression {
        out.push('\n');
        out.push_str("gzip \"${ARCHIVE}\"\n");
        out.push_str("ARCHIVE=\"${ARCHIVE}.gz\"\n");
    }

    if p.backup.encryption {
        out.push('\n');
        out.push_str(
            "openssl enc -aes-256-cbc -pbkdf2 -pass env:BACKUP_PASSPHRASE \\\n  -in \"${ARCHIVE}\" -out \"${ARCHIVE}.enc\"\n",
        );
        out.push_str("rm \"${ARCHIVE}\"\n");
        out.push_str("ARCHIVE=\"${ARCHIVE}.enc\"\n");
    }

    if let Some(remote) = &p.backup.remote {
        out.push('\n');
        let _ = writeln!(
            out,
            "aws s3 cp \"${{ARCHIVE}}\" \"s3://{}/{}{}/$(basename \"${{ARCHIVE}}\")\"",
            remote.bucket, remote.prefix, p.name
        );
    }

    out.push('\n');
    let _ = writeln!(
        out,
        "find \"${{BACKUP_DIR}}\" -name '{}-*' -mtime +{} -delete",
        p.name, p.backup.retention_days
    );
    let _ = writeln!(out, "echo \"backup complete: ${{ARCHIVE}}\"");
    out
}

/// Render `restore.sh`. Takes the archive path as its single argument and
/// undoes the encryption/compression layers in reverse order.
pub(crate) fn render_restore_script(p: &BackupScriptParams<'_>) -> String {
    let mut out = String::new();
    out.push_str("#!/bin/sh\n");
    let _ = writeln!(out, "# Restore {} from a backup archive", p.name);
    out.push_str("set -eu\n\n");
    out.push_str("if [ $# -ne 1 ]; then\n");
    out.push_str("  echo \"usage: $0 <archive>\" >&2\n");
    out.push_str("  exit 64\n");
    out.push_str("fi\n");
    out.push_str("ARCHIVE=\"$1\"\n");

    if p.backup.encryption {
        out.push('\n');
        out.push_str("case \"${ARCHIVE}\" in\n");
        out.push_str("  *.enc)\n");
        out.push_str(
            "    openssl enc -d -aes-256-cbc -pbkdf2 -pass env:BACKUP_PASSPHRASE \\\n      -in \"${ARCHIVE}\" -out \"${ARCHIVE%.enc}\"\n",
        );
        out.push_str("    ARCHIVE=\"${ARCHIVE%.enc}\"\n");
        out.push_str("    ;;\n");
        out.push_str("esac\n");
    }

    if p.backup.compression {
        out.push('\n');
        out.push_str("case \"${ARCHIVE}\" in\n");
        out.push_str("  *.gz)\n");
        out.push_str("    gunzip \"${ARCHIVE}\"\n");
        out.push_str("    ARCHIVE=\"${ARCHIVE%.gz}\"\n");
        out.push_str("    ;;\n");
        out.push_str("esac\n");
    }

    out.push('\n');
    match (p.kind, p.backup.kind) {
        (DatabaseKind::Postgresql, BackupKind::Full) => {
            let _ = writeln!(
                out,
                "pg_restore -h {} -p {} -U postgres --clean --if-exists -d postgres \"${{ARCHIVE}}\"",
                p.host, p.port
            );
        }
        (DatabaseKind::Postgresql, BackupKind::Incremental) => {
            out.push_str("# Base backups are restored into an empty data directory with the\n");
            out.push_str("# server stopped.\n");
            out.push_str("DATA_DIR=\"${PGDATA:-/var/lib/postgresql/data}\"\n");
            out.push_str("tar -xf \"${ARCHIVE}\" -C \"${DATA_DIR}\"\n");
        }
        (DatabaseKind::Redis, BackupKind::Full) => {
            out.push_str("# RDB snapshots are loaded at startup; place the file and restart.\n");
            out.push_str("cp \"${ARCHIVE}\" /data/dump.rdb\n");
        }
        (DatabaseKind::Redis, BackupKind::Incremental) => {
            out.push_str("rm -rf /data/appendonlydir\n");
            out.push_str("tar -xf \"${ARCHIVE}\" -C /data\n");
        }
    }

    let _ = writeln!(out, "echo \"restore complete\"");
    out
}

impl BackupSpec {
    fn kind_name(&self) -> &'static str {
        match self.kind {
            BackupKind::Full => "Full",
            BackupKind::Incremental => "Incremental",
        }
    }
}
