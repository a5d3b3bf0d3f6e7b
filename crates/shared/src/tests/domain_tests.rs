use super::*;

#[test]
fn engineer_can_edit_assets_but_not_the_catalog() {
    assert!(Role::Engineer.allows(Capability::EditAssets));
    assert!(!Role::Engineer.allows(Capability::ManageCatalog));
    assert!(Role::Admin.allows(Capability::ManageCatalog));
    assert!(!Role::Guest.allows(Capability::EditAssets));
    assert!(!Role::Guest.allows(Capability::ManageCatalog));
}

#[test]
fn admin_view_is_hidden_from_non_admins() {
    assert!(View::visible_to(Role::Admin).contains(&View::Admin));
    for role in [Role::Engineer, Role::Guest] {
        let views = View::visible_to(role);
        assert_eq!(views.len(), 4);
        assert!(!views.contains(&View::Admin));
    }
}

#[test]
fn enums_parse_their_wire_names_case_insensitively() {
    assert_eq!("PLC".parse::<AssetType>(), Ok(AssetType::Plc));
    assert_eq!("network".parse::<AssetType>(), Ok(AssetType::Network));
    assert_eq!(" in progress ".parse::<TaskStatus>(), Ok(TaskStatus::InProgress));
    assert_eq!("ADMIN".parse::<Role>(), Ok(Role::Admin));
    let err = "critical".parse::<Severity>().expect_err("unknown severity");
    assert_eq!(err.value, "critical");
}

#[test]
fn asset_serializes_device_class_as_type() {
    let now = Utc::now();
    let asset = Asset {
        id: AssetId::from("a1"),
        name: "Boiler 1 Controller".into(),
        asset_type: AssetType::Hmi,
        location: "Plant Floor 3".into(),
        criticality: Criticality::High,
        owner: "ops".into(),
        last_review: now,
        created_by: UserId::from("u1"),
        created_at: now,
        controls: vec![AppliedControl {
            id: ControlId::from("c1"),
            name: "MFA".into(),
            status: ControlStatus::Planned,
            applied_at: now,
        }],
    };

    let json = serde_json::to_value(&asset).expect("json");
    assert_eq!(json["type"], "HMI");
    assert_eq!(json["controls"][0]["status"], "Planned");

    let task_status = serde_json::to_value(TaskStatus::ToDo).expect("json");
    assert_eq!(task_status, "To Do");
}

#[test]
fn generated_ids_have_no_separator() {
    let id = AssetId::generate();
    assert!(!id.as_str().contains('-'));
    assert_eq!(id.as_str().len(), 32);
}

#[test]
fn new_asset_draft_defaults() {
    let draft = NewAsset::default();
    assert_eq!(draft.asset_type, AssetType::Plc);
    assert_eq!(draft.criticality, Criticality::High);
    assert!(draft.owner.is_empty());
    assert_eq!(NewControl::default().severity, Severity::Medium);
}
