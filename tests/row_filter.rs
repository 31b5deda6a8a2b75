mod common;

use serde_json::{json, Value};

use common::Fixture;
use gsec::query::where_matches;
use gsec::{AccessOptions, Principal};

async fn products() -> Fixture {
    let fx = Fixture::new().await;
    fx.create_store("boss", "A").await;
    fx.create_store("boss", "B").await;
    for product in [
        json!({"id": "p1", "ownerType": "Store", "ownerId": "A", "status": "open"}),
        json!({"id": "p2", "ownerType": "Store", "ownerId": "B", "status": "open"}),
        json!({"id": "p3", "ownerType": "User", "ownerId": "m1", "status": "closed"}),
        json!({"id": "p4", "ownerType": "User", "ownerId": "u9", "status": "open"}),
    ] {
        fx.create(Some("boss"), "Product", product, &AccessOptions::default()).await;
    }
    fx
}

#[tokio::test]
async fn polymorphic_resources_filter_by_each_candidate_type() {
    let fx = products().await;
    fx.join("m1", "A", "member").await;

    let predicate = fx
        .sec
        .before_access(Some(&Principal::new("m1")), "Product", None, &AccessOptions::scoped())
        .await
        .unwrap();

    assert_eq!(
        predicate,
        Some(json!({"or": [
            {"ownerId": {"in": ["A"]}, "ownerType": "Store"},
            {"ownerId": "m1", "ownerType": "User"}
        ]}))
    );

    let visible: Vec<String> = fx
        .instances
        .find("Product", predicate.as_ref())
        .await
        .iter()
        .map(|p| p["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(visible, vec!["p1", "p3"]);
}

#[tokio::test]
async fn discriminator_in_query_narrows_candidates() {
    let fx = products().await;
    fx.join("m1", "A", "member").await;

    let predicate = fx
        .sec
        .before_access(
            Some(&Principal::new("m1")),
            "Product",
            Some(json!({"ownerType": "Store"})),
            &AccessOptions::scoped(),
        )
        .await
        .unwrap();

    assert_eq!(
        predicate,
        Some(json!({"and": [
            {"ownerType": "Store"},
            {"ownerId": {"in": ["A"]}, "ownerType": "Store"}
        ]}))
    );
}

#[tokio::test]
async fn group_models_filter_by_their_own_id() {
    let fx = products().await;
    fx.join("m1", "B", "member").await;

    let predicate = fx
        .sec
        .before_access(Some(&Principal::new("m1")), "Store", None, &AccessOptions::scoped())
        .await
        .unwrap();
    assert_eq!(predicate, Some(json!({"id": {"in": ["B"]}})));
    assert_eq!(fx.instances.count("Store", predicate.as_ref()).await, 1);
}

#[tokio::test]
async fn merged_predicate_is_conjunction_of_caller_and_group() {
    let fx = Fixture::with_invoices().await;
    fx.join("m1", "A", "member").await;
    let principal = Principal::new("m1");

    let group = fx
        .sec
        .row_filter()
        .group_predicate(&principal, "Invoice", None)
        .await
        .unwrap();

    let rows: Vec<Value> = fx.instances.find("Invoice", None).await;
    let callers = [
        json!({"amount": 10}),
        json!({"amount": {"neq": 10}}),
        json!({"or": [{"storeId": "B"}, {"amount": 20}]}),
        json!({"storeId": {"in": ["A", "B"]}}),
    ];

    for caller in callers {
        let merged = fx
            .sec
            .before_access(Some(&principal), "Invoice", Some(caller.clone()), &AccessOptions::scoped())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(merged, json!({"and": [caller.clone(), group.clone()]}));
        for row in &rows {
            assert_eq!(
                where_matches(&merged, row),
                where_matches(&caller, row) && where_matches(&group, row),
                "caller {caller} row {row}"
            );
        }
    }
}

#[tokio::test]
async fn filter_is_left_alone_when_not_applicable() {
    let fx = Fixture::with_invoices().await;
    let principal = Principal::new("m1");
    let caller = Some(json!({"amount": 10}));

    let cases = [
        (Some(&principal), Some(json!({"id": 3})), AccessOptions::scoped()),
        (Some(&principal), caller.clone(), AccessOptions::default()),
        (Some(&principal), caller.clone(), AccessOptions::scoped().skip_group_filter()),
        (None, caller.clone(), AccessOptions::scoped()),
    ];

    for (principal, existing, options) in cases {
        let result = fx
            .sec
            .before_access(principal, "Invoice", existing.clone(), &options)
            .await
            .unwrap();
        assert_eq!(result, existing);
    }

    // Unsecured models are never rewritten.
    let users = fx
        .sec
        .before_access(Some(&principal), "User", caller.clone(), &AccessOptions::scoped())
        .await
        .unwrap();
    assert_eq!(users, caller);
}

#[tokio::test]
async fn operator_conditions_on_id_are_still_scoped() {
    let fx = Fixture::with_invoices().await;
    fx.join("m1", "A", "member").await;
    let principal = Principal::new("m1");

    for (caller, visible) in [
        (json!({"id": {"neq": 0}}), 2),
        (json!({"id": {"in": [1, 3]}}), 1),
        (json!({"id": {"inq": [3]}}), 0),
        (json!({"id": null}), 0),
    ] {
        let predicate = fx
            .sec
            .before_access(Some(&principal), "Invoice", Some(caller.clone()), &AccessOptions::scoped())
            .await
            .unwrap();
        assert_ne!(predicate.as_ref(), Some(&caller), "{caller} left unscoped");
        assert_eq!(fx.instances.count("Invoice", predicate.as_ref()).await, visible, "{caller}");
    }
}

#[tokio::test]
async fn non_member_sees_nothing() {
    let fx = Fixture::with_invoices().await;
    let predicate = fx
        .sec
        .before_access(Some(&Principal::new("stranger")), "Invoice", None, &AccessOptions::scoped())
        .await
        .unwrap();

    assert_eq!(predicate, Some(json!({"storeId": {"in": []}})));
    assert_eq!(fx.instances.count("Invoice", predicate.as_ref()).await, 0);
}

#[tokio::test]
async fn unsecured_model_has_no_group_predicate() {
    let fx = Fixture::new().await;
    let err = fx
        .sec
        .row_filter()
        .group_predicate(&Principal::new("m1"), "User", None)
        .await
        .unwrap_err();
    assert!(err.is_configuration(), "{err}");
}
