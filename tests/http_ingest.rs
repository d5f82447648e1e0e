// tests/http_ingest.rs
use actix_web::{test, web, App};
use charon_charging_engine::api::routes;
use charon_charging_engine::engine::StatsEngine;
use charon_charging_engine::models::cdr::Cdr;
use charon_charging_engine::models::AttrGetCdrs;
use charon_charging_engine::services::CdrServer;
use charon_charging_engine::storage::{CdrStorage, MemoryCdrStorage};
use chrono::{TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;

fn sample_cdr() -> Cdr {
    let setup = Utc.with_ymd_and_hms(2013, 11, 7, 8, 42, 26).unwrap();
    Cdr {
        id: Cdr::gen_id("dsafdsaf", setup),
        tor: "*voice".to_string(),
        acc_id: "dsafdsaf".to_string(),
        cdr_host: "192.168.1.1".to_string(),
        cdr_source: "test".to_string(),
        req_type: "*rated".to_string(),
        direction: "*out".to_string(),
        tenant: "voxtelecom.org".to_string(),
        category: "call".to_string(),
        account: "1001".to_string(),
        subject: "1001".to_string(),
        destination: "+4986517174963".to_string(),
        setup_time: setup,
        answer_time: Some(setup + chrono::Duration::seconds(1)),
        usage: Duration::from_secs(10),
        supplier: "SUPPL1".to_string(),
        disconnect_cause: "NORMAL_CLEARING".to_string(),
        cost: 1.01,
        ..Cdr::default()
    }
}

#[actix_web::test]
async fn test_health_endpoint() {
    let storage = Arc::new(MemoryCdrStorage::new());
    let cdr_server = Arc::new(CdrServer::new(
        storage.clone(),
        Arc::new(StatsEngine::new(50)),
        Vec::new(),
        None,
    ));
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(cdr_server))
            .configure(routes::configure),
    )
    .await;

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
}

#[actix_web::test]
async fn test_cdr_post_round_trip() {
    let storage = Arc::new(MemoryCdrStorage::new());
    let stats = Arc::new(StatsEngine::new(50));
    let cdr_server = Arc::new(CdrServer::new(storage.clone(), stats, Vec::new(), None));
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(cdr_server))
            .configure(routes::configure),
    )
    .await;

    let cdr = sample_cdr();
    let body = serde_urlencoded::to_string(cdr.as_http_form()).unwrap();
    let req = test::TestRequest::post()
        .uri("/cdr_post")
        .insert_header(("content-type", "application/x-www-form-urlencoded"))
        .set_payload(body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    // The wire round trip preserves the canonical field subset.
    let stored = storage.get_cdrs(&AttrGetCdrs::default()).await.unwrap();
    assert_eq!(stored.len(), 1);
    let stored = &stored[0];
    assert_eq!(stored.id, cdr.id);
    assert_eq!(stored.acc_id, cdr.acc_id);
    assert_eq!(stored.tenant, cdr.tenant);
    assert_eq!(stored.account, cdr.account);
    assert_eq!(stored.destination, cdr.destination);
    assert_eq!(stored.setup_time, cdr.setup_time);
    assert_eq!(stored.answer_time, cdr.answer_time);
    assert_eq!(stored.usage, cdr.usage);
    assert_eq!(stored.cost, cdr.cost);
}

#[actix_web::test]
async fn test_cdr_post_malformed_time_is_rejected() {
    let storage = Arc::new(MemoryCdrStorage::new());
    let cdr_server = Arc::new(CdrServer::new(
        storage.clone(),
        Arc::new(StatsEngine::new(50)),
        Vec::new(),
        None,
    ));
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(cdr_server))
            .configure(routes::configure),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/cdr_post")
        .insert_header(("content-type", "application/x-www-form-urlencoded"))
        .set_payload("accid=x&setup_time=garbage")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 400);
    assert!(storage
        .get_cdrs(&AttrGetCdrs::default())
        .await
        .unwrap()
        .is_empty());
}
