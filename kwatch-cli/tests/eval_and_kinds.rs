use std::fs;
use assert_cmd::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use predicates::str::contains;
use serde_json::Value;
use tempfile::TempDir;

const SERVICE: &str = r#"{
  "apiVersion": "v1",
  "kind": "Service",
  "metadata": {"name": "web", "namespace": "default", "resourceVersion": "7"},
  "spec": {"ports": [{"name": "http", "port": 80}, {"name": "https", "port": 443}]}
}"#;

fn kwatch() -> Command {
    Command::new(env!("CARGO_BIN_EXE_kwatch"))
}

#[test]
fn eval_renders_file() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("svc.json");
    fs::write(&path, SERVICE).expect("write");

    kwatch()
        .args(["eval", "--jsonpath", "{.metadata.name}:{.spec.ports[*].port}"])
        .arg(&path)
        .assert()
        .success()
        .stdout("web:80 443\n");
}

#[test]
fn eval_defaults_to_whole_object() {
    kwatch()
        .args(["eval", "-"])
        .write_stdin(r#"{"b": 1, "a": {"c": true}}"#)
        .assert()
        .success()
        .stdout("{\"a\":{\"c\":true},\"b\":1}\n");
}

#[test]
fn eval_reads_yaml_from_stdin() {
    kwatch()
        .args(["eval", "--jsonpath", "{range .spec.ports[*]}{.name}={.port};{end}"])
        .write_stdin("spec:\n  ports:\n  - name: http\n    port: 80\n  - name: grpc\n    port: 9000\n")
        .assert()
        .success()
        .stdout("http=80;grpc=9000;\n");
}

#[test]
fn eval_items_renders_one_line_each() {
    kwatch()
        .args(["eval", "--items", "--jsonpath", "{.metadata.name}"])
        .write_stdin(r#"{"kind": "List", "items": [{"metadata": {"name": "a"}}, {"metadata": {"name": "b"}}]}"#)
        .assert()
        .success()
        .stdout("a\nb\n");
}

#[test]
fn eval_rejects_bad_template() {
    kwatch()
        .args(["eval", "--jsonpath", "{.spec.ports[0}"])
        .write_stdin(SERVICE)
        .assert()
        .failure()
        .stderr(contains("invalid --jsonpath").and(contains("offset")));
}

#[test]
fn kinds_table_lists_every_resource() {
    kwatch()
        .arg("kinds")
        .assert()
        .success()
        .stdout(
            contains("services")
                .and(contains("pods"))
                .and(contains("nodes"))
                .and(contains("configmaps"))
                .and(contains("cluster")),
        );
}

#[test]
fn kinds_json_is_machine_readable() {
    let output = kwatch().args(["kinds", "--json"]).output().expect("run");
    assert!(output.status.success());
    let kinds: Value = serde_json::from_slice(&output.stdout).expect("json");
    let names: Vec<&str> = kinds
        .as_array()
        .expect("array")
        .iter()
        .filter_map(|k| k["name"].as_str())
        .collect();
    assert_eq!(
        names,
        vec!["services", "pods", "nodes", "namespaces", "configmaps", "endpoints"]
    );
    assert_eq!(kinds[2]["scope"], "cluster");
    assert_eq!(kinds[0]["apiVersion"], "v1");
}

#[test]
fn watch_rejects_unsupported_resource() {
    kwatch()
        .args(["watch", "--resource", "deployments", "--server", "http://127.0.0.1:1"])
        .assert()
        .failure()
        .stderr(contains("not supported"));
}

#[test]
fn watch_rejects_bad_template_before_connecting() {
    kwatch()
        .args([
            "watch",
            "--resource",
            "pods",
            "--jsonpath",
            "{range .items[*]}",
            "--server",
            "http://127.0.0.1:1",
        ])
        .assert()
        .failure()
        .stderr(contains("invalid --jsonpath"));
}
