mod test_support;

use serde_json::json;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{error_code, request, request_ok, spawn_sidecar, str_at, temp_dir, u64_at};

struct Room {
    classroom_id: String,
}

fn seed_practical_life(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) -> Room {
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
        json!({ "name": "Whale Class" }),
    );
    let classroom_id = str_at(&created, "/classroomId").to_string();
    for (i, name) in ["Carrying a Chair", "Spooning", "Bead Pouring", "Folding Cloths"]
        .iter()
        .enumerate()
    {
        let work = request_ok(
            stdin,
            reader,
            &format!("work-{}", i),
            "curriculum.works.create",
            json!({
                "classroomId": classroom_id,
                "area": "practical life",
                "name": name,
                "workKey": format!("pl_{}", i + 1),
                "sequence": i + 1
            }),
        );
        assert_eq!(u64_at(&work, "/work/sequence"), i as u64 + 1);
    }
    Room { classroom_id }
}

fn add_child(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    classroom_id: &str,
    name: &str,
) -> String {
    let child = request_ok(
        stdin,
        reader,
        &format!("child-{}", name),
        "children.create",
        json!({ "classroomId": classroom_id, "name": name }),
    );
    str_at(&child, "/child/id").to_string()
}

fn status_by_work(overview: &serde_json::Value) -> Vec<(String, String)> {
    let mut rows: Vec<(String, String)> = overview["records"]
        .as_array()
        .expect("records")
        .iter()
        .map(|r| {
            (
                str_at(r, "/workName").to_string(),
                str_at(r, "/status").to_string(),
            )
        })
        .collect();
    rows.sort();
    rows
}

#[test]
fn sync_links_typos_provisions_unknown_names_and_backfills() {
    let workspace = temp_dir("montree-sync-e2e");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let room = seed_practical_life(&mut stdin, &mut reader, &workspace);
    let amy = add_child(&mut stdin, &mut reader, &room.classroom_id, "Amy");
    let bo = add_child(&mut stdin, &mut reader, &room.classroom_id, "Bo");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "a1",
        "assignments.create",
        json!({
            "classroomId": room.classroom_id,
            "childId": amy,
            "workName": "beed pouring",
            "area": "practical_life",
            "progressStatus": "practicing",
            "weekStart": "2026-09-07"
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "a2",
        "assignments.create",
        json!({
            "classroomId": room.classroom_id,
            "childId": bo,
            "workName": "Flower Arranging",
            "area": "practical_life",
            "weekStart": "2026-09-07"
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "a3",
        "assignments.create",
        json!({
            "classroomId": room.classroom_id,
            "childId": bo,
            "area": "practical_life",
            "weekStart": "2026-09-14"
        }),
    );

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "sync-1",
        "progress.sync",
        json!({ "classroomId": room.classroom_id }),
    );
    assert_eq!(first["success"], json!(true));
    assert_eq!(
        first["summary"],
        json!({
            "matched": 2,
            "alreadyLinked": 0,
            "autoAdded": 1,
            "notFound": 1,
            "backfilled": 6
        })
    );
    let unresolved = first["unresolved"].as_array().expect("unresolved");
    assert_eq!(unresolved.len(), 1);
    assert_eq!(unresolved[0]["reason"], json!("missing_work_name"));
    assert_eq!(unresolved[0]["childId"], json!(bo));

    let works = request_ok(
        &mut stdin,
        &mut reader,
        "works",
        "curriculum.works.list",
        json!({ "classroomId": room.classroom_id, "area": "practical_life" }),
    );
    let added = works["works"]
        .as_array()
        .expect("works")
        .iter()
        .find(|w| w["name"] == json!("Flower Arranging"))
        .expect("auto-added work");
    assert_eq!(added["sequence"], json!(5));
    assert_eq!(added["isCustom"], json!(true));
    assert_eq!(added["workKey"], json!("custom_flower_arranging"));

    let amy_progress = request_ok(
        &mut stdin,
        &mut reader,
        "amy",
        "progress.get",
        json!({ "classroomId": room.classroom_id, "childId": amy }),
    );
    assert_eq!(
        status_by_work(&amy_progress),
        vec![
            ("Bead Pouring".to_string(), "practicing".to_string()),
            ("Carrying a Chair".to_string(), "mastered".to_string()),
            ("Spooning".to_string(), "mastered".to_string()),
        ]
    );
    assert_eq!(amy_progress["summary"]["total"], json!(5));
    assert_eq!(amy_progress["summary"]["notStarted"], json!(2));

    let bo_progress = request_ok(
        &mut stdin,
        &mut reader,
        "bo",
        "progress.get",
        json!({ "classroomId": room.classroom_id, "childId": bo, "area": "practical_life" }),
    );
    assert_eq!(bo_progress["summary"]["mastered"], json!(4));
    assert_eq!(bo_progress["summary"]["practicing"], json!(1));

    let linked = request_ok(
        &mut stdin,
        &mut reader,
        "list",
        "assignments.list",
        json!({ "classroomId": room.classroom_id }),
    );
    let with_work = linked["assignments"]
        .as_array()
        .expect("assignments")
        .iter()
        .filter(|a| a["workId"].is_string())
        .count();
    assert_eq!(with_work, 2);

    let rerun = request_ok(
        &mut stdin,
        &mut reader,
        "sync-2",
        "progress.sync",
        json!({ "classroomId": room.classroom_id }),
    );
    assert_eq!(
        rerun["summary"],
        json!({
            "matched": 0,
            "alreadyLinked": 2,
            "autoAdded": 0,
            "notFound": 1,
            "backfilled": 0
        })
    );
}

#[test]
fn sync_without_auto_provision_reports_instead_of_adding() {
    let workspace = temp_dir("montree-sync-no-provision");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let room = seed_practical_life(&mut stdin, &mut reader, &workspace);
    let amy = add_child(&mut stdin, &mut reader, &room.classroom_id, "Amy");
    let bo = add_child(&mut stdin, &mut reader, &room.classroom_id, "Bo");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "cfg",
        "setup.update",
        json!({ "section": "reconcile", "patch": { "autoProvision": false } }),
    );
    for (id, child, name) in [("a1", &amy, "Flower Arranging"), ("a2", &bo, "Spooning")] {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            id,
            "assignments.create",
            json!({
                "classroomId": room.classroom_id,
                "childId": child,
                "workName": name,
                "area": "practical_life"
            }),
        );
    }

    // Only Bo is synced; Amy's assignment stays untouched.
    let bo_only = request_ok(
        &mut stdin,
        &mut reader,
        "sync-bo",
        "progress.sync",
        json!({ "classroomId": room.classroom_id, "childId": bo }),
    );
    assert_eq!(bo_only["summary"]["matched"], json!(1));
    assert_eq!(bo_only["summary"]["backfilled"], json!(1));
    assert_eq!(bo_only["summary"]["notFound"], json!(0));

    let all = request_ok(
        &mut stdin,
        &mut reader,
        "sync-all",
        "progress.sync",
        json!({ "classroomId": room.classroom_id }),
    );
    assert_eq!(all["summary"]["alreadyLinked"], json!(1));
    assert_eq!(all["summary"]["notFound"], json!(1));
    assert_eq!(all["summary"]["autoAdded"], json!(0));
    assert_eq!(all["unresolved"][0]["reason"], json!("no_match"));

    let works = request_ok(
        &mut stdin,
        &mut reader,
        "works",
        "curriculum.works.list",
        json!({ "classroomId": room.classroom_id }),
    );
    assert_eq!(works["works"].as_array().map(|a| a.len()), Some(4));
}

#[test]
fn assignment_statuses_go_through_the_codec_before_sync() {
    let workspace = temp_dir("montree-sync-status");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let room = seed_practical_life(&mut stdin, &mut reader, &workspace);
    let amy = add_child(&mut stdin, &mut reader, &room.classroom_id, "Amy");
    let bo = add_child(&mut stdin, &mut reader, &room.classroom_id, "Bo");

    let by_ordinal = request_ok(
        &mut stdin,
        &mut reader,
        "ordinal",
        "assignments.create",
        json!({
            "classroomId": room.classroom_id,
            "childId": amy,
            "workName": "Spooning",
            "progressStatus": 3
        }),
    );
    assert_eq!(by_ordinal["assignment"]["progressStatus"], json!("mastered"));

    let by_alias = request_ok(
        &mut stdin,
        &mut reader,
        "alias",
        "assignments.create",
        json!({
            "classroomId": room.classroom_id,
            "childId": bo,
            "workName": "Bead Pouring",
            "progressStatus": " In_Progress "
        }),
    );
    assert_eq!(by_alias["assignment"]["progressStatus"], json!("practicing"));

    for (id, status) in [("typo", json!("mastred")), ("range", json!(4)), ("bool", json!(true))] {
        let resp = request(
            &mut stdin,
            &mut reader,
            id,
            "assignments.create",
            json!({
                "classroomId": room.classroom_id,
                "childId": amy,
                "workName": "Folding Cloths",
                "progressStatus": status
            }),
        );
        assert_eq!(error_code(&resp), "bad_params", "{} -> {}", id, resp);
    }
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "list",
        "assignments.list",
        json!({ "classroomId": room.classroom_id }),
    );
    assert_eq!(listed["assignments"].as_array().map(|a| a.len()), Some(2));

    let synced = request_ok(
        &mut stdin,
        &mut reader,
        "sync",
        "progress.sync",
        json!({ "classroomId": room.classroom_id }),
    );
    assert_eq!(synced["summary"]["matched"], json!(2));
    assert_eq!(synced["errors"].as_array().map(|a| a.len()), Some(0));

    let amy_progress = request_ok(
        &mut stdin,
        &mut reader,
        "amy",
        "progress.get",
        json!({ "classroomId": room.classroom_id, "childId": amy }),
    );
    assert_eq!(
        status_by_work(&amy_progress),
        vec![
            ("Carrying a Chair".to_string(), "mastered".to_string()),
            ("Spooning".to_string(), "mastered".to_string()),
        ]
    );
}
