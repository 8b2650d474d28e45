use uuid::Uuid;

/// Generate an OpenTelemetry-compatible trace ID (32 hex characters).
pub fn generate_trace_id() -> String {
    let id = Uuid::new_v4();
    // OTel trace IDs are 32 hex chars (128 bits) -- a UUID without hyphens is
    // exactly 32 hex chars.
    id.as_simple().to_string()
}

/// Generate a span ID (16 hex characters).
pub fn generate_span_id() -> String {
    let id = Uuid::new_v4();
    // Take the first 16 hex chars (64 bits) for span IDs.
    id.as_simple().to_string()[..16].to_string()
}

/// Create a named span for a common operation, returning the span and its
/// trace ID for logging correlation.
pub fn create_operation_span(operation: &str) -> (tracing::Span, String) {
    let trace_id = generate_trace_id();
    let span_id = generate_span_id();
    let span = tracing::info_span!(
        "operation",
        trace_id = %trace_id,
        span_id = %span_id,
        operation = %operation,
    );
    (span, trace_id)
}

/// Create a child span under an existing trace ID.
pub fn create_child_span(trace_id: &str, operation: &str) -> tracing::Span {
    let span_id = generate_span_id();
    tracing::info_span!(
        "operation",
        trace_id = %trace_id,
        span_id = %span_id,
        operation = %operation,
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
