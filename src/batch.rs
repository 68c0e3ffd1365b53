//! Report card generation for many students at once.
//!
//! Each student is fetched and persisted on its own; a failure is recorded
//! against that student and the loop moves on.

use serde::Serialize;

use crate::report_card::fetch_report_card_multi_exam;
use crate::store::{ReportCardSink, RowStore};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedCard {
    pub student_id: String,
    pub exam_id: String,
    pub percentage: f64,
    pub grade: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchError {
    pub student_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub generated: Vec<GeneratedCard>,
    pub errors: Vec<BatchError>,
}

/// Builds and stores one report card per student. The stored row is keyed by
/// the first requested exam id.
pub async fn generate_report_cards<S, K>(
    store: &S,
    sink: &K,
    school_code: &str,
    student_ids: &[String],
    exam_ids: &[String],
) -> BatchReport
where
    S: RowStore + ?Sized,
    K: ReportCardSink + ?Sized,
{
    let mut report = BatchReport::default();
    let Some(key_exam_id) = exam_ids.first() else {
        report.errors.extend(student_ids.iter().map(|sid| BatchError {
            student_id: sid.clone(),
            error: "no exams selected".to_string(),
        }));
        return report;
    };

    for student_id in student_ids {
        let outcome = match fetch_report_card_multi_exam(store, school_code, student_id, exam_ids)
            .await
        {
            Ok(Some(data)) => sink
                .upsert_report_card(school_code, student_id, key_exam_id, exam_ids, &data)
                .await
                .map(|()| GeneratedCard {
                    student_id: student_id.clone(),
                    exam_id: key_exam_id.clone(),
                    percentage: data.summary.percentage,
                    grade: data.summary.grade.clone(),
                })
                .map_err(|e| format!("failed to save report card: {e}")),
            Ok(None) => Err("student, exam or school not found".to_string()),
            Err(e) => Err(e.to_string()),
        };

        match outcome {
            Ok(card) => report.generated.push(card),
            Err(error) => {
                tracing::warn!(%school_code, %student_id, %error, "report card generation failed");
                report.errors.push(BatchError {
                    student_id: student_id.clone(),
                    error,
                });
            }
        }
    }

    tracing::info!(
        %school_code,
        generated = report.generated.len(),
        failed = report.errors.len(),
        "report card batch finished"
    );
    report
}
