mod test_support;

use serde_json::json;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{error_code, request, request_ok, spawn_sidecar, str_at, temp_dir};

fn seed_room(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) -> String {
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(
        stdin,
        reader,
        "room",
        "classrooms.create",
        json!({ "name": "Dolphin Class" }),
    );
    let classroom_id = str_at(&created, "/classroomId").to_string();
    let works = [
        ("practical_life", "pl_1", "Carrying a Chair"),
        ("practical_life", "pl_2", "Spooning"),
        ("practical_life", "pl_3", "Bead Pouring"),
        ("math", "ma_1", "Number Rods"),
        ("math", "ma_2", "Spindle Boxes"),
    ];
    for (i, (area, key, name)) in works.iter().enumerate() {
        let _ = request_ok(
            stdin,
            reader,
            &format!("work-{}", i),
            "curriculum.works.create",
            json!({ "classroomId": classroom_id, "area": area, "name": name, "workKey": key }),
        );
    }
    classroom_id
}

fn statuses(overview: &serde_json::Value) -> Vec<(String, String)> {
    let mut rows: Vec<(String, String)> = overview["records"]
        .as_array()
        .expect("records")
        .iter()
        .map(|r| {
            (
                str_at(r, "/workKey").to_string(),
                str_at(r, "/status").to_string(),
            )
        })
        .collect();
    rows.sort();
    rows
}

#[test]
fn bootstrap_keeps_going_when_one_child_fails() {
    let workspace = temp_dir("montree-bootstrap-partial");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let classroom_id = seed_room(&mut stdin, &mut reader, &workspace);

    // An existing Bo makes the second insert of the batch fail.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "bo",
        "children.create",
        json!({ "classroomId": classroom_id, "name": "Bo" }),
    );

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "import",
        "classroom.bootstrap",
        json!({
            "classroomId": classroom_id,
            "children": [
                { "name": "Amy", "age": 4, "works": [{ "workKey": "pl_3" }, { "workKey": "ma_2" }] },
                { "name": "Bo", "works": [{ "workKey": "pl_1" }] },
                { "name": "Cy", "nameChinese": "思宇", "works": [{ "workKey": "pl_1" }, {}] }
            ]
        }),
    );
    assert_eq!(result["success"], json!(true));
    assert_eq!(
        result["summary"],
        json!({ "childrenCreated": 2, "progressWritten": 6, "masteredBackfilled": 3 })
    );
    let errors = result["errors"].as_array().expect("errors");
    assert_eq!(errors.len(), 1);
    assert!(
        errors[0].as_str().unwrap_or("").contains("\"Bo\""),
        "error names the child: {}",
        errors[0]
    );

    let children = result["children"].as_array().expect("children");
    let names: Vec<&str> = children.iter().map(|c| str_at(c, "/name")).collect();
    assert_eq!(names, vec!["Amy", "Cy"]);
    let amy_id = str_at(&children[0], "/id").to_string();
    assert_eq!(children[0]["currentWorks"], json!(2));
    assert_eq!(children[0]["masteredWorks"], json!(3));

    let amy = request_ok(
        &mut stdin,
        &mut reader,
        "amy",
        "progress.get",
        json!({ "classroomId": classroom_id, "childId": amy_id }),
    );
    assert_eq!(
        statuses(&amy),
        vec![
            ("ma_1".to_string(), "mastered".to_string()),
            ("ma_2".to_string(), "practicing".to_string()),
            ("pl_1".to_string(), "mastered".to_string()),
            ("pl_2".to_string(), "mastered".to_string()),
            ("pl_3".to_string(), "practicing".to_string()),
        ]
    );
    let backfilled_by = amy["records"]
        .as_array()
        .expect("records")
        .iter()
        .find(|r| r["workKey"] == json!("pl_1"))
        .map(|r| r["updatedBy"].clone());
    assert_eq!(backfilled_by, Some(json!("import")));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "list",
        "children.list",
        json!({ "classroomId": classroom_id }),
    );
    assert_eq!(listed["children"].as_array().map(|a| a.len()), Some(3));
}

#[test]
fn explicit_selection_stays_practicing_with_single_write_chunks() {
    let workspace = temp_dir("montree-bootstrap-chunks");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let classroom_id = seed_room(&mut stdin, &mut reader, &workspace);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "cfg",
        "setup.update",
        json!({ "section": "reconcile", "patch": { "bootstrapChunkSize": 1 } }),
    );

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "import",
        "classroom.bootstrap",
        json!({
            "classroomId": classroom_id,
            "children": [
                { "name": "Dee", "works": [{ "workKey": "pl_3" }, { "workKey": "pl_2" }, { "workKey": "zz_missing" }] }
            ]
        }),
    );
    assert_eq!(result["summary"]["childrenCreated"], json!(1));
    assert_eq!(result["summary"]["progressWritten"], json!(3));
    assert_eq!(result["summary"]["masteredBackfilled"], json!(1));
    let errors = result["errors"].as_array().expect("errors");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].as_str().unwrap_or("").contains("zz_missing"));

    let dee_id = str_at(&result, "/children/0/id").to_string();
    let dee = request_ok(
        &mut stdin,
        &mut reader,
        "dee",
        "progress.get",
        json!({ "classroomId": classroom_id, "childId": dee_id, "area": "practical_life" }),
    );
    assert_eq!(
        statuses(&dee),
        vec![
            ("pl_1".to_string(), "mastered".to_string()),
            ("pl_2".to_string(), "practicing".to_string()),
            ("pl_3".to_string(), "practicing".to_string()),
        ]
    );
}

#[test]
fn preview_reports_matches_gaps_and_missing_areas_without_writing() {
    let workspace = temp_dir("montree-bootstrap-preview");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let classroom_id = seed_room(&mut stdin, &mut reader, &workspace);

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "preview",
        "classroom.bootstrapPreview",
        json!({
            "classroomId": classroom_id,
            "children": [{
                "name": "Eve",
                "works": [
                    { "area": "Practical Life", "rawText": "beed pouring" },
                    { "area": "maths", "rawText": "Golden Beads" }
                ]
            }]
        }),
    );
    let preview = &result["preview"];
    assert_eq!(preview["totalChildren"], json!(1));
    assert_eq!(preview["matched"], json!(1));
    assert_eq!(preview["unmatched"], json!(1));
    assert_eq!(preview["missing"], json!(3));
    assert_eq!(preview["readyToImport"], json!(false));

    let works = preview["children"][0]["works"].as_array().expect("works");
    assert_eq!(works.len(), 5);
    assert_eq!(works[0]["area"], json!("practical_life"));
    assert_eq!(works[0]["status"], json!("matched"));
    assert_eq!(works[0]["tier"], json!("word_overlap"));
    assert_eq!(works[0]["workKey"], json!("pl_3"));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "list",
        "children.list",
        json!({ "classroomId": classroom_id }),
    );
    assert_eq!(listed["children"].as_array().map(|a| a.len()), Some(0));

    let empty = request(
        &mut stdin,
        &mut reader,
        "empty",
        "classroom.bootstrap",
        json!({ "classroomId": classroom_id, "children": [] }),
    );
    assert_eq!(error_code(&empty), "bad_params");
}
