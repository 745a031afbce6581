use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar_with_env(envs: &[(&str, &str)]) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut cmd = Command::new(exe);
    cmd.env_remove("GRADEBOOKD_WORKSPACE")
        .env_remove("GRADEBOOKD_IMPORT_TTL_SECS")
        .env_remove("GRADEBOOKD_MAX_IMPORT_SESSIONS");
    for (k, v) in envs {
        cmd.env(k, v);
    }
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradebookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    spawn_sidecar_with_env(&[])
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_of(value: &serde_json::Value) -> (String, i64, String) {
    assert_eq!(value["ok"], false, "expected an error: {}", value);
    (
        value["error"]["code"].as_str().unwrap_or_default().to_string(),
        value["error"]["details"]["status"].as_i64().unwrap_or_default(),
        value["error"]["message"].as_str().unwrap_or_default().to_string(),
    )
}


fn approx(v: &serde_json::Value, expected: f64) {
    let got = v.as_f64().unwrap_or_else(|| panic!("expected a number, got {}", v));
    assert!((got - expected).abs() < 1e-9, "expected {}, got {}", expected, got);
}

const GOALS: [&str; 6] = [
    "Requirements",
    "Configuration Management",
    "Project Management",
    "Design",
    "Refactoring",
    "Tests",
];

#[test]
fn students_are_registered_with_clean_cpfs() {
    let workspace = temp_dir("gradebookd-students-crud");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({ "cpf": "123.456.789-01", "name": " Ana ", "email": "ana@example.com" }),
    );
    assert_eq!(created["student"]["cpf"], "12345678901");
    assert_eq!(created["student"]["name"], "Ana");

    let (code, status, message) = error_of(&request(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "cpf": "12345678901", "name": "Other" }),
    ));
    assert_eq!((code.as_str(), status), ("bad_request", 400));
    assert!(message.contains("already exists"));

    let (code, _, _) = error_of(&request(
        &mut stdin,
        &mut reader,
        "4",
        "students.create",
        json!({ "cpf": "123", "name": "Short" }),
    ));
    assert_eq!(code, "bad_request");

    let (code, _, _) = error_of(&request(
        &mut stdin,
        &mut reader,
        "5",
        "students.create",
        json!({ "cpf": "98765432100" }),
    ));
    assert_eq!(code, "bad_params");

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "students.update",
        json!({ "cpf": "123.456.789-01", "email": "ana@uni.example" }),
    );
    assert_eq!(updated["student"]["name"], "Ana");
    assert_eq!(updated["student"]["email"], "ana@uni.example");

    let listed = request_ok(&mut stdin, &mut reader, "7", "students.list", json!({}));
    assert_eq!(listed["students"].as_array().map(|a| a.len()), Some(1));

    let (code, status, _) = error_of(&request(
        &mut stdin,
        &mut reader,
        "8",
        "students.update",
        json!({ "cpf": "00000000000", "name": "Ghost" }),
    ));
    assert_eq!((code.as_str(), status), ("not_found", 404));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn classes_and_enrollments_drive_the_averages() {
    let workspace = temp_dir("gradebookd-classes-crud");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({ "cpf": "11111111111", "name": "Ana" }),
    );

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "classes.create",
        json!({ "topic": "ESS", "semester": 1, "year": 2025 }),
    );
    let class_id = created["classId"].as_str().expect("classId").to_string();
    assert_eq!(class_id, "ESS-2025-1");

    let (code, _, _) = error_of(&request(
        &mut stdin,
        &mut reader,
        "4",
        "classes.create",
        json!({ "topic": "ESS", "semester": 1, "year": 2025 }),
    ));
    assert_eq!(code, "bad_request");
    let (code, _, message) = error_of(&request(
        &mut stdin,
        &mut reader,
        "5",
        "classes.create",
        json!({ "topic": "ESS", "semester": 3, "year": 2025 }),
    ));
    assert_eq!(code, "bad_request");
    assert!(message.contains("semester"));

    let (code, status, _) = error_of(&request(
        &mut stdin,
        &mut reader,
        "6",
        "enrollments.add",
        json!({ "classId": class_id, "cpf": "99999999999" }),
    ));
    assert_eq!((code.as_str(), status), ("not_found", 404));

    request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "enrollments.add",
        json!({ "classId": class_id, "cpf": "11111111111" }),
    );

    // Five MPA and one MANA: (5 * 7 + 0) / 6 rounds to 5.8.
    let mut last = json!(null);
    for (i, goal) in GOALS.iter().enumerate() {
        let grade = if *goal == "Tests" { "MANA" } else { "MPA" };
        last = request_ok(
            &mut stdin,
            &mut reader,
            &format!("8-{}", i),
            "enrollments.setEvaluation",
            json!({ "classId": class_id, "cpf": "11111111111", "goal": goal, "grade": grade }),
        );
    }
    approx(&last["enrollment"]["mediaPreFinal"], 5.8);
    approx(&last["enrollment"]["mediaPosFinal"], 2.9);

    let with_final = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "enrollments.setNotaFinal",
        json!({ "classId": class_id, "cpf": "11111111111", "grade": "MA" }),
    );
    assert_eq!(with_final["enrollment"]["notaFinal"], "MA");
    approx(&with_final["enrollment"]["mediaPosFinal"], 7.9);

    // Raising the pre-final average to 7 or more drops the final exam.
    let passed = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "enrollments.setEvaluation",
        json!({ "classId": class_id, "cpf": "11111111111", "goal": "Tests", "grade": "MA" }),
    );
    approx(&passed["enrollment"]["mediaPreFinal"], 7.5);
    approx(&passed["enrollment"]["mediaPosFinal"], 7.5);
    assert!(passed["enrollment"]["notaFinal"].is_null());

    let cleared = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "enrollments.setEvaluation",
        json!({ "classId": class_id, "cpf": "11111111111", "goal": "Design", "grade": "" }),
    );
    assert!(cleared["enrollment"]["mediaPreFinal"].is_null());

    let (code, status, _) = error_of(&request(
        &mut stdin,
        &mut reader,
        "12",
        "enrollments.setEvaluation",
        json!({ "classId": class_id, "cpf": "11111111111", "goal": "Cooking", "grade": "MA" }),
    ));
    assert_eq!((code.as_str(), status), ("bad_request", 400));
    let (code, _, _) = error_of(&request(
        &mut stdin,
        &mut reader,
        "13",
        "enrollments.setEvaluation",
        json!({ "classId": class_id, "cpf": "11111111111", "goal": "Design", "grade": "ma" }),
    ));
    assert_eq!(code, "bad_request");

    let flagged = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "enrollments.setReprovadoPorFalta",
        json!({ "classId": class_id, "cpf": "11111111111", "value": true }),
    );
    assert_eq!(flagged["enrollment"]["reprovadoPorFalta"], true);

    let listed = request_ok(&mut stdin, &mut reader, "15", "classes.list", json!({}));
    assert_eq!(listed["classes"][0]["id"], class_id);
    assert_eq!(listed["classes"][0]["enrollmentCount"], 1);

    request_ok(
        &mut stdin,
        &mut reader,
        "16",
        "enrollments.remove",
        json!({ "classId": class_id, "cpf": "11111111111" }),
    );
    let (code, _, _) = error_of(&request(
        &mut stdin,
        &mut reader,
        "17",
        "enrollments.remove",
        json!({ "classId": class_id, "cpf": "11111111111" }),
    ));
    assert_eq!(code, "not_found");

    request_ok(
        &mut stdin,
        &mut reader,
        "18",
        "classes.delete",
        json!({ "classId": class_id }),
    );
    let (code, status, message) = error_of(&request(
        &mut stdin,
        &mut reader,
        "19",
        "classes.get",
        json!({ "classId": class_id }),
    ));
    assert_eq!((code.as_str(), status), ("not_found", 404));
    assert_eq!(message, "Class not Found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn custom_specification_is_validated_and_persisted() {
    let workspace = temp_dir("gradebookd-classes-spec");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let (code, _, _) = error_of(&request(
        &mut stdin,
        &mut reader,
        "2",
        "classes.create",
        json!({
            "topic": "PLC",
            "semester": 2,
            "year": 2025,
            "specification": {
                "goals": [],
                "conceptValues": { "MA": 10.0, "MPA": 7.0, "MANA": 0.0 }
            }
        }),
    ));
    assert_eq!(code, "bad_request");

    let spec = json!({
        "goals": [
            { "goal": "Exam", "weight": 3.0 },
            { "goal": "Project", "weight": 1.0 }
        ],
        "conceptValues": { "MA": 10.0, "MPA": 6.0, "MANA": 2.0 }
    });
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "classes.create",
        json!({ "topic": "PLC", "semester": 2, "year": 2025, "specification": spec }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.create",
        json!({ "cpf": "22222222222", "name": "Bia" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "enrollments.add",
        json!({ "classId": "PLC-2025-2", "cpf": "22222222222" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "enrollments.setEvaluation",
        json!({ "classId": "PLC-2025-2", "cpf": "22222222222", "goal": "Exam", "grade": "MA" }),
    );
    // (3 * 10 + 1 * 2) / 4 = 8.0
    let view = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "enrollments.setEvaluation",
        json!({
            "classId": "PLC-2025-2",
            "cpf": "22222222222",
            "goal": "Project",
            "grade": "MANA"
        }),
    );
    approx(&view["enrollment"]["mediaPreFinal"], 8.0);
    drop(stdin);
    let _ = child.wait();

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "classes.get",
        json!({ "classId": "PLC-2025-2" }),
    );
    assert_eq!(class["customSpecification"], true);
    assert_eq!(class["specification"], spec);
    approx(&class["enrollments"][0]["mediaPreFinal"], 8.0);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn deleting_a_student_drops_its_enrollments_across_restarts() {
    let workspace = temp_dir("gradebookd-students-cascade");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    for (i, cpf) in ["11111111111", "22222222222"].iter().enumerate() {
        request_ok(
            &mut stdin,
            &mut reader,
            &format!("2-{}", i),
            "students.create",
            json!({ "cpf": cpf, "name": format!("Student {}", i) }),
        );
    }
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "classes.create",
        json!({ "topic": "ESS", "semester": 2, "year": 2024 }),
    );
    for cpf in ["11111111111", "22222222222"] {
        request_ok(
            &mut stdin,
            &mut reader,
            &format!("4-{}", cpf),
            "enrollments.add",
            json!({ "classId": "ESS-2024-2", "cpf": cpf }),
        );
    }
    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "enrollments.setEvaluation",
        json!({ "classId": "ESS-2024-2", "cpf": "11111111111", "goal": "Design", "grade": "MA" }),
    );
    let removed = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "students.delete",
        json!({ "cpf": "111.111.111-11" }),
    );
    assert_eq!(removed["removedFromClasses"], json!(["ESS-2024-2"]));
    drop(stdin);
    let _ = child.wait();

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let students = request_ok(&mut stdin, &mut reader, "8", "students.list", json!({}));
    assert_eq!(students["students"].as_array().map(|a| a.len()), Some(1));
    let class = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "classes.get",
        json!({ "classId": "ESS-2024-2" }),
    );
    let enrolled: Vec<_> = class["enrollments"]
        .as_array()
        .expect("enrollments")
        .iter()
        .map(|e| e["studentCpf"].clone())
        .collect();
    assert_eq!(enrolled, vec![json!("22222222222")]);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
