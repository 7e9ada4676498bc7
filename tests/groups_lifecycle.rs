mod helpers;

use helpers::{january_group, strings, Sidecar};
use serde_json::json;

#[test]
fn create_validates_schedule_fields() {
    let (_dir, mut sidecar) = Sidecar::with_workspace();

    let cases = vec![
        json!({ "name": "No days", "classDays": [] }),
        json!({ "name": "Bad day", "classDays": [9] }),
        json!({ "name": "Bad letter", "classDays": "LZ" }),
        json!({ "name": "", "classDays": [1] }),
        json!({ "name": "Bad date", "classDays": [1], "startDate": "01/02/2024" }),
        json!({
            "name": "Inverted",
            "classDays": [1],
            "startDate": "2024-02-01",
            "endDate": "2024-01-01"
        }),
        json!({
            "name": "Split outside",
            "classDays": [1],
            "startDate": "2024-01-01",
            "endDate": "2024-01-31",
            "partial1EndDate": "2024-03-01"
        }),
        json!({ "name": "Unknown field", "classDays": [1], "colour": "red" }),
    ];
    for params in cases {
        assert_eq!(
            sidecar.fail_code("groups.create", params.clone()),
            "bad_params",
            "{}",
            params
        );
    }
    let listed = sidecar.ok("groups.list", json!({}));
    assert_eq!(listed["groups"].as_array().map(Vec::len), Some(0));
}

#[test]
fn letters_and_indices_are_the_same_schedule() {
    let (_dir, mut sidecar) = Sidecar::with_workspace();
    let by_letters = sidecar.create_group(json!({
        "name": "Letters",
        "classDays": "LX",
        "startDate": "2024-01-01",
        "endDate": "2024-01-15"
    }));
    let group = sidecar.ok("groups.get", json!({ "groupId": by_letters }));
    assert_eq!(group["group"]["classDays"], json!([1, 3]));
    assert_eq!(group["group"]["classDayLetters"], "LX");

    let dates = sidecar.ok("groups.classDates", json!({ "groupId": by_letters }));
    assert_eq!(
        strings(&dates["dates"]),
        vec!["2024-01-01", "2024-01-03", "2024-01-08", "2024-01-10", "2024-01-15"]
    );
}

#[test]
fn class_dates_resolve_partials() {
    let (_dir, mut sidecar) = Sidecar::with_workspace();
    let group_id = january_group(&mut sidecar, "1A");

    let first = sidecar.ok(
        "groups.classDates",
        json!({ "groupId": group_id, "period": "partial1" }),
    );
    assert_eq!(
        strings(&first["dates"]),
        vec!["2024-01-01", "2024-01-03", "2024-01-08"]
    );
    let second = sidecar.ok(
        "groups.classDates",
        json!({ "groupId": group_id, "period": "partial2" }),
    );
    assert_eq!(strings(&second["dates"]), vec!["2024-01-10", "2024-01-15"]);

    let custom = sidecar.ok(
        "groups.classDates",
        json!({ "groupId": group_id, "period": "custom", "from": "2024-01-02", "to": "2024-01-09" }),
    );
    assert_eq!(strings(&custom["dates"]), vec!["2024-01-03", "2024-01-08"]);

    assert_eq!(
        sidecar.fail_code(
            "groups.classDates",
            json!({ "groupId": group_id, "period": "semester" })
        ),
        "bad_params"
    );
}

#[test]
fn group_dates_fall_back_to_global_term() {
    let (_dir, mut sidecar) = Sidecar::with_workspace();
    let group_id = sidecar.create_group(json!({ "name": "Open", "classDays": [5] }));

    assert_eq!(
        sidecar.fail_code("groups.classDates", json!({ "groupId": group_id })),
        "schedule_incomplete"
    );

    sidecar.ok(
        "settings.update",
        json!({ "patch": { "globalStartDate": "2024-03-01", "globalEndDate": "2024-03-15" } }),
    );
    let dates = sidecar.ok("groups.classDates", json!({ "groupId": group_id }));
    assert_eq!(
        strings(&dates["dates"]),
        vec!["2024-03-01", "2024-03-08", "2024-03-15"]
    );
}

#[test]
fn list_is_ordered_by_name_with_student_counts() {
    let (_dir, mut sidecar) = Sidecar::with_workspace();
    let b = january_group(&mut sidecar, "Beta");
    january_group(&mut sidecar, "Alpha");
    sidecar.create_student(&b, "Ana");

    let listed = sidecar.ok("groups.list", json!({}));
    let groups = listed["groups"].as_array().expect("groups");
    let names: Vec<&str> = groups.iter().filter_map(|g| g["name"].as_str()).collect();
    assert_eq!(names, vec!["Alpha", "Beta"]);
    assert_eq!(groups[1]["studentCount"], 1);
    assert_eq!(groups[0]["studentCount"], 0);
}

#[test]
fn delete_cascades_only_within_the_group() {
    let (_dir, mut sidecar) = Sidecar::with_workspace();
    let doomed = january_group(&mut sidecar, "Doomed");
    let kept = january_group(&mut sidecar, "Kept");
    let a = sidecar.create_student(&doomed, "Ana");
    let b = sidecar.create_student(&kept, "Beto");
    sidecar.set(&doomed, &a, "2024-01-01", json!("present"));
    sidecar.set(&doomed, &a, "2024-01-03", json!("late"));
    sidecar.set(&kept, &b, "2024-01-01", json!("absent"));

    let deleted = sidecar.ok("groups.delete", json!({ "groupId": doomed }));
    assert_eq!(deleted["studentsRemoved"], 1);
    assert_eq!(deleted["attendanceRemoved"], 2);

    assert_eq!(
        sidecar.fail_code("groups.get", json!({ "groupId": doomed })),
        "not_found"
    );
    let report = sidecar.ok("reports.period", json!({ "groupId": kept }));
    assert_eq!(report["rows"][0]["absent"], 5);
    assert_eq!(
        sidecar.fail_code("groups.delete", json!({ "groupId": doomed })),
        "not_found"
    );
}

#[test]
fn weekday_change_requires_confirmation_before_dropping_records() {
    let (_dir, mut sidecar) = Sidecar::with_workspace();
    let group_id = january_group(&mut sidecar, "1A");
    let ana = sidecar.create_student(&group_id, "Ana");
    sidecar.set(&group_id, &ana, "2024-01-01", json!("present"));
    sidecar.set(&group_id, &ana, "2024-01-03", json!("present"));
    sidecar.set(&group_id, &ana, "2024-01-10", json!("late"));

    // Dropping Wednesday would remove two records.
    let err = sidecar.fail(
        "groups.update",
        json!({ "groupId": group_id, "patch": { "classDays": [1, 5] } }),
    );
    assert_eq!(err["code"], "confirm_required");
    assert_eq!(err["details"]["recordsToRemove"], 2);

    let unchanged = sidecar.ok("groups.get", json!({ "groupId": group_id }));
    assert_eq!(unchanged["group"]["classDays"], json!([1, 3]));

    let updated = sidecar.ok(
        "groups.update",
        json!({
            "groupId": group_id,
            "patch": { "classDays": [1, 5] },
            "confirmScheduleChange": true
        }),
    );
    assert_eq!(updated["attendanceRemoved"], 2);
    assert_eq!(updated["group"]["classDays"], json!([1, 5]));

    let grid = sidecar.ok(
        "attendance.open",
        json!({ "groupId": group_id, "today": "2024-01-20" }),
    );
    let recorded: Vec<&str> = grid["students"][0]["cells"]
        .as_array()
        .expect("cells")
        .iter()
        .filter(|c| !c["status"].is_null())
        .filter_map(|c| c["date"].as_str())
        .collect();
    assert_eq!(recorded, vec!["2024-01-01"]);
}

#[test]
fn renaming_keeps_records_without_confirmation() {
    let (_dir, mut sidecar) = Sidecar::with_workspace();
    let group_id = january_group(&mut sidecar, "1A");
    let ana = sidecar.create_student(&group_id, "Ana");
    sidecar.set(&group_id, &ana, "2024-01-03", json!("present"));

    let updated = sidecar.ok(
        "groups.update",
        json!({ "groupId": group_id, "patch": { "name": "1B", "subject": "History" } }),
    );
    assert_eq!(updated["attendanceRemoved"], 0);
    assert_eq!(updated["group"]["name"], "1B");
    assert_eq!(updated["group"]["studentCount"], 1);
}

#[test]
fn split_is_checked_against_whichever_bounds_are_known() {
    let (_dir, mut sidecar) = Sidecar::with_workspace();

    // Only a start date: a split before it is already out of range.
    assert_eq!(
        sidecar.fail_code(
            "groups.create",
            json!({
                "name": "Half window",
                "classDays": [1],
                "startDate": "2024-03-01",
                "partial1EndDate": "2024-02-01"
            })
        ),
        "bad_params"
    );

    // No bounds at all: the split is kept, and later term dates must respect it.
    let open = sidecar.create_group(json!({
        "name": "Open",
        "classDays": [1, 3],
        "partial1EndDate": "2030-01-01"
    }));
    let err = sidecar.fail(
        "settings.update",
        json!({ "patch": { "globalStartDate": "2024-01-01", "globalEndDate": "2024-01-15" } }),
    );
    assert_eq!(err["code"], "bad_params");
    assert_eq!(err["details"]["groupIds"], json!([open]));

    let settings = sidecar.ok("settings.get", json!({}));
    assert!(settings["settings"]["globalStartDate"].is_null());
    sidecar.ok(
        "groups.update",
        json!({ "groupId": open, "patch": { "name": "Still editable" } }),
    );
}
