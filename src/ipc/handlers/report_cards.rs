use futures::executor::block_on;
use serde_json::json;

use crate::batch;
use crate::ipc::error::{err, ok};
use crate::ipc::params::{required_str, required_str_list, store};
use crate::ipc::types::{AppState, Request};
use crate::report_card::{self, ReportCardData};
use crate::store::{SqliteStore, StoreError};

type HandlerResult = Result<serde_json::Value, serde_json::Value>;

fn document_response(
    req: &Request,
    fetched: Result<Option<ReportCardData>, StoreError>,
) -> HandlerResult {
    match fetched {
        Ok(Some(data)) => Ok(ok(&req.id, json!(data))),
        Ok(None) => Err(err(
            &req.id,
            "not_found",
            "student, exam or school not found",
            None,
        )),
        Err(e) => {
            tracing::error!(error = %e, method = %req.method, "report card read failed");
            Err(err(&req.id, "db_query_failed", e.to_string(), None))
        }
    }
}

fn handle_fetch(store: &SqliteStore, req: &Request) -> HandlerResult {
    let school_code = required_str(req, "schoolCode")?;
    let student_id = required_str(req, "studentId")?;
    let exam_id = required_str(req, "examId")?;
    document_response(
        req,
        block_on(report_card::fetch_report_card(
            store,
            &school_code,
            &student_id,
            &exam_id,
        )),
    )
}

fn handle_fetch_multi_exam(store: &SqliteStore, req: &Request) -> HandlerResult {
    let school_code = required_str(req, "schoolCode")?;
    let student_id = required_str(req, "studentId")?;
    let exam_ids = required_str_list(req, "examIds")?;
    document_response(
        req,
        block_on(report_card::fetch_report_card_multi_exam(
            store,
            &school_code,
            &student_id,
            &exam_ids,
        )),
    )
}

fn handle_generate(store: &SqliteStore, req: &Request) -> HandlerResult {
    let school_code = required_str(req, "schoolCode")?;
    let student_ids = required_str_list(req, "studentIds")?;
    let exam_ids = required_str_list(req, "examIds")?;
    if exam_ids.is_empty() {
        return Err(err(&req.id, "bad_params", "examIds must not be empty", None));
    }
    let report = block_on(batch::generate_report_cards(
        store,
        store,
        &school_code,
        &student_ids,
        &exam_ids,
    ));
    Ok(ok(&req.id, json!(report)))
}

fn handle_get(store: &SqliteStore, req: &Request) -> HandlerResult {
    let school_code = required_str(req, "schoolCode")?;
    let student_id = required_str(req, "studentId")?;
    let exam_id = required_str(req, "examId")?;
    match store.report_card(&school_code, &student_id, &exam_id) {
        Ok(Some(card)) => Ok(ok(&req.id, card)),
        Ok(None) => Err(err(
            &req.id,
            "not_found",
            "report card not generated",
            Some(json!({ "studentId": student_id, "examId": exam_id })),
        )),
        Err(e) => Err(err(&req.id, "db_query_failed", e.to_string(), None)),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: fn(&SqliteStore, &Request) -> HandlerResult = match req.method.as_str() {
        "reportCard.fetch" => handle_fetch,
        "reportCard.fetchMultiExam" => handle_fetch_multi_exam,
        "reportCards.generate" => handle_generate,
        "reportCards.get" => handle_get,
        _ => return None,
    };
    let resp = match store(state, req) {
        Ok(s) => handler(s, req).unwrap_or_else(|e| e),
        Err(e) => e,
    };
    Some(resp)
}
