use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;

use crate::calc::{Conceito, GradeSpecification};
use crate::gradebook::{Class, Enrollment, EnrollmentRecord, Evaluation, Gradebook, Student};

pub const DB_FILE: &str = "gradebook.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            cpf TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            topic TEXT NOT NULL,
            semester INTEGER NOT NULL,
            year INTEGER NOT NULL,
            specification_json TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            class_id TEXT NOT NULL,
            student_cpf TEXT NOT NULL,
            reprovado_por_falta INTEGER NOT NULL DEFAULT 0,
            sort_order INTEGER NOT NULL,
            PRIMARY KEY(class_id, student_cpf),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(student_cpf) REFERENCES students(cpf)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_student ON enrollments(student_cpf)",
        [],
    )?;

    // The final-exam grade is stored as the 'Final' evaluation row.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS evaluations(
            class_id TEXT NOT NULL,
            student_cpf TEXT NOT NULL,
            goal TEXT NOT NULL,
            grade TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            PRIMARY KEY(class_id, student_cpf, goal),
            FOREIGN KEY(class_id, student_cpf) REFERENCES enrollments(class_id, student_cpf)
        )",
        [],
    )?;

    Ok(conn)
}

fn parse_grade(raw: &str) -> anyhow::Result<Conceito> {
    raw.parse::<Conceito>()
        .map_err(|e| anyhow::anyhow!("stored grade is invalid: {e}"))
}

/// Rebuilds the registries from the workspace database.
pub fn load_gradebook(conn: &Connection) -> anyhow::Result<Gradebook> {
    let mut book = Gradebook::new();

    let mut stmt = conn.prepare("SELECT cpf, name, email FROM students ORDER BY rowid")?;
    let students = stmt
        .query_map([], |r| {
            Ok(Student {
                cpf: r.get(0)?,
                name: r.get(1)?,
                email: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    for s in students {
        book.add_student(s)?;
    }

    let mut evals_by_enrollment: HashMap<(String, String), Vec<Evaluation>> = HashMap::new();
    let mut stmt = conn.prepare(
        "SELECT class_id, student_cpf, goal, grade FROM evaluations
         ORDER BY class_id, student_cpf, sort_order",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    for (class_id, cpf, goal, grade) in rows {
        let grade = parse_grade(&grade)
            .with_context(|| format!("class {class_id}, student {cpf}, goal {goal}"))?;
        evals_by_enrollment
            .entry((class_id, cpf))
            .or_default()
            .push(Evaluation { goal, grade });
    }

    let mut stmt = conn.prepare(
        "SELECT id, topic, semester, year, specification_json FROM classes ORDER BY rowid",
    )?;
    let classes = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, i64>(2)?,
                r.get::<_, i64>(3)?,
                r.get::<_, Option<String>>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut enroll_stmt = conn.prepare(
        "SELECT student_cpf, reprovado_por_falta FROM enrollments
         WHERE class_id = ? ORDER BY sort_order",
    )?;
    for (id, topic, semester, year, spec_json) in classes {
        let specification = match spec_json {
            Some(text) => Some(
                serde_json::from_str::<GradeSpecification>(&text)
                    .with_context(|| format!("invalid specification stored for class {id}"))?,
            ),
            None => None,
        };
        let semester = u8::try_from(semester).context("semester out of range")?;
        let year = i32::try_from(year).context("year out of range")?;
        let mut class = Class::new(&topic, semester, year, specification)
            .with_context(|| format!("invalid class row {id}"))?;

        let enrollments = enroll_stmt
            .query_map([&id], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)? != 0)))?
            .collect::<Result<Vec<_>, _>>()?;
        for (cpf, reprovado) in enrollments {
            let evaluations = evals_by_enrollment
                .remove(&(id.clone(), cpf.clone()))
                .unwrap_or_default();
            class.restore_enrollment(Enrollment::from_record(EnrollmentRecord {
                student_cpf: cpf,
                evaluations,
                nota_final: None,
                media_pre_final: None,
                media_pos_final: None,
                reprovado_por_falta: reprovado,
            }));
        }
        book.add_class(class)?;
    }

    Ok(book)
}

pub fn save_student(conn: &Connection, student: &Student) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO students(cpf, name, email) VALUES(?, ?, ?)
         ON CONFLICT(cpf) DO UPDATE SET name = excluded.name, email = excluded.email",
        (&student.cpf, &student.name, &student.email),
    )
    .context("failed to save student")?;
    Ok(())
}

pub fn delete_student(conn: &Connection, cpf: &str) -> anyhow::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM evaluations WHERE student_cpf = ?", [cpf])?;
    tx.execute("DELETE FROM enrollments WHERE student_cpf = ?", [cpf])?;
    tx.execute("DELETE FROM students WHERE cpf = ?", [cpf])?;
    tx.commit().context("failed to delete student")?;
    Ok(())
}

/// Writes the class row and replaces its enrollments and evaluations.
pub fn save_class(conn: &Connection, class: &Class) -> anyhow::Result<()> {
    let class_id = class.id();
    let spec_json = class
        .custom_specification()
        .map(serde_json::to_string)
        .transpose()
        .context("failed to serialize specification")?;

    let tx = conn.unchecked_transaction()?;
    let exists: Option<i64> = tx
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| r.get(0))
        .optional()?;
    if exists.is_none() {
        tx.execute(
            "INSERT INTO classes(id, topic, semester, year, specification_json)
             VALUES(?, ?, ?, ?, ?)",
            (
                &class_id,
                class.topic(),
                class.semester() as i64,
                class.year() as i64,
                &spec_json,
            ),
        )?;
    } else {
        tx.execute(
            "UPDATE classes SET specification_json = ? WHERE id = ?",
            (&spec_json, &class_id),
        )?;
    }

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    tx.execute("DELETE FROM evaluations WHERE class_id = ?", [&class_id])?;
    tx.execute("DELETE FROM enrollments WHERE class_id = ?", [&class_id])?;

    for (i, enrollment) in class.enrollments().iter().enumerate() {
        tx.execute(
            "INSERT INTO enrollments(class_id, student_cpf, reprovado_por_falta, sort_order)
             VALUES(?, ?, ?, ?)",
            (
                &class_id,
                enrollment.student_cpf(),
                if enrollment.reprovado_por_falta() { 1 } else { 0 },
                i as i64,
            ),
        )?;
        for (j, ev) in enrollment.evaluations().iter().enumerate() {
            tx.execute(
                "INSERT INTO evaluations(class_id, student_cpf, goal, grade, sort_order)
                 VALUES(?, ?, ?, ?, ?)",
                (
                    &class_id,
                    enrollment.student_cpf(),
                    &ev.goal,
                    ev.grade.as_str(),
                    j as i64,
                ),
            )?;
        }
    }

    tx.commit()
        .with_context(|| format!("failed to save class {class_id}"))?;
    Ok(())
}

pub fn delete_class(conn: &Connection, class_id: &str) -> anyhow::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM evaluations WHERE class_id = ?", [class_id])?;
    tx.execute("DELETE FROM enrollments WHERE class_id = ?", [class_id])?;
    tx.execute("DELETE FROM classes WHERE id = ?", [class_id])?;
    tx.commit().context("failed to delete class")?;
    Ok(())
}
