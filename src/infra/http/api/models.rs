//! Conversions from engine records to wire types.

use namewright_api_types::{
    InvalidationResponse, JobResponse, PatchPropagationSettingsRequest,
    PropagationErrorResponse, PropagationSettingsResponse,
};

use crate::application::propagation::SettingsPatch;
use crate::cache::InvalidationOutcome;
use crate::domain::entities::{
    PropagationErrorRecord, PropagationJobRecord, PropagationSettingsRecord,
};

pub fn job_response(job: PropagationJobRecord) -> JobResponse {
    JobResponse {
        id: job.id,
        workspace_id: job.workspace_id,
        job_type: job.job_type,
        status: job.status,
        source: job.source,
        affected_strings_count: job.affected_strings_count,
        processed_count: job.processed_count,
        failed_count: job.failed_count,
        metadata: job.metadata,
        retry_of: job.retry_of,
        created_at: job.created_at,
        started_at: job.started_at,
        completed_at: job.completed_at,
    }
}

pub fn error_response(error: PropagationErrorRecord) -> PropagationErrorResponse {
    PropagationErrorResponse {
        id: error.id,
        job_id: error.job_id,
        string_id: error.string_id,
        error_type: error.error_type,
        message: error.message,
        details: error.details,
        is_resolved: error.is_resolved,
        created_at: error.created_at,
    }
}

pub fn settings_response(settings: PropagationSettingsRecord) -> PropagationSettingsResponse {
    PropagationSettingsResponse {
        workspace_id: settings.workspace_id,
        auto_propagate: settings.auto_propagate,
        require_approval: settings.require_approval,
        notify_on_completion: settings.notify_on_completion,
        notify_on_failure: settings.notify_on_failure,
        batch_size: settings.batch_size,
        retry_attempts: settings.retry_attempts,
        retry_delay_seconds: settings.retry_delay_seconds,
    }
}

pub fn settings_patch(request: PatchPropagationSettingsRequest) -> SettingsPatch {
    SettingsPatch {
        auto_propagate: request.auto_propagate,
        require_approval: request.require_approval,
        notify_on_completion: request.notify_on_completion,
        notify_on_failure: request.notify_on_failure,
        batch_size: request.batch_size,
        retry_attempts: request.retry_attempts,
        retry_delay_seconds: request.retry_delay_seconds,
    }
}

pub fn invalidation_response(outcome: InvalidationOutcome) -> InvalidationResponse {
    InvalidationResponse {
        event_id: outcome.event_id,
        affected_rules: outcome.affected_rules,
        keys_deleted: outcome.keys_deleted,
        job_id: outcome.job.map(|job| job.id),
    }
}
