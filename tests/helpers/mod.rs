#![allow(dead_code)]

use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use tempfile::TempDir;

pub struct Sidecar {
    child: Child,
    stdin: Option<ChildStdin>,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Sidecar {
    pub fn spawn() -> Self {
        let exe = env!("CARGO_BIN_EXE_attendanced");
        let mut child = Command::new(exe)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn attendanced");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        Self {
            child,
            stdin: Some(stdin),
            reader: BufReader::new(stdout),
            next_id: 0,
        }
    }

    /// Spawn with a fresh workspace already selected.
    pub fn with_workspace() -> (TempDir, Self) {
        let dir = tempfile::tempdir().expect("temp workspace");
        let mut sidecar = Self::spawn();
        sidecar.ok("workspace.select", json!({ "path": dir.path().to_string_lossy() }));
        (dir, sidecar)
    }

    pub fn send_line(&mut self, line: &str) -> Value {
        let stdin = self.stdin.as_mut().expect("stdin open");
        writeln!(stdin, "{}", line).expect("write request");
        stdin.flush().expect("flush request");

        let mut out = String::new();
        self.reader.read_line(&mut out).expect("read response line");
        assert!(!out.trim().is_empty(), "empty response for {}", line);
        serde_json::from_str(out.trim()).expect("parse response json")
    }

    /// Full response envelope.
    pub fn call(&mut self, method: &str, params: Value) -> Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let payload = json!({ "id": id, "method": method, "params": params });
        let value = self.send_line(&payload.to_string());
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    pub fn ok(&mut self, method: &str, params: Value) -> Value {
        let value = self.call(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(true),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").cloned().unwrap_or(Value::Null)
    }

    /// Error envelope of a call expected to fail.
    pub fn fail(&mut self, method: &str, params: Value) -> Value {
        let value = self.call(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        value.get("error").cloned().expect("error object")
    }

    pub fn fail_code(&mut self, method: &str, params: Value) -> String {
        self.fail(method, params)
            .get("code")
            .and_then(|v| v.as_str())
            .expect("error code")
            .to_string()
    }

    pub fn create_group(&mut self, params: Value) -> String {
        self.ok("groups.create", params)
            .get("groupId")
            .and_then(|v| v.as_str())
            .expect("groupId")
            .to_string()
    }

    pub fn create_student(&mut self, group_id: &str, name: &str) -> String {
        self.ok(
            "students.create",
            json!({ "groupId": group_id, "name": name }),
        )
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string()
    }

    pub fn set(&mut self, group_id: &str, student_id: &str, date: &str, status: Value) {
        self.ok(
            "attendance.set",
            json!({
                "groupId": group_id,
                "studentId": student_id,
                "date": date,
                "status": status
            }),
        );
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        drop(self.stdin.take());
        let _ = self.child.wait();
    }
}

/// Mon/Wed group from 2024-01-01 to 2024-01-15, split after 2024-01-08.
pub fn january_group(sidecar: &mut Sidecar, name: &str) -> String {
    sidecar.create_group(json!({
        "name": name,
        "subject": "Math",
        "classDays": [1, 3],
        "startDate": "2024-01-01",
        "endDate": "2024-01-15",
        "partial1EndDate": "2024-01-08"
    }))
}

pub fn strings(v: &Value) -> Vec<String> {
    v.as_array()
        .expect("array")
        .iter()
        .map(|s| s.as_str().expect("string").to_string())
        .collect()
}
