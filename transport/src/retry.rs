//! Bounded, immediate, sequential retry.
//!
//! The loop drives attempts `0..=retry_count`. Attempt `k + 1` starts only
//! after attempt `k` completed and was classified. Error values for the
//! caller are built here and nowhere else.

use std::sync::atomic::{AtomicU32, Ordering};

use courier_types::{FetchError, Headers, RetryPolicy};

use crate::{Attempt, Body, CallContext, Outcome, Response, Transport, classify, classify_status};

/// Static facts about the call, used for error messages and logging.
pub(crate) struct CallInfo<'a> {
    pub client: &'a str,
    pub destination: &'a str,
}

/// Runs the retry loop for one prepared message.
///
/// `started` is updated before each attempt so a caller that loses the task
/// to a panic still knows how many attempts were made.
pub(crate) async fn run<T: Transport>(
    transport: &T,
    policy: RetryPolicy,
    ctx: &CallContext,
    message: &T::Message,
    info: &CallInfo<'_>,
    started: &AtomicU32,
) -> Response {
    let mut attempt: u32 = 0;
    let mut last_status: u16 = 0;

    loop {
        started.store(attempt + 1, Ordering::Relaxed);
        let result = ctx.guard(transport.attempt(message)).await;

        if let Attempt::Status { code, .. } = &result {
            last_status = *code;
        }

        if classify(&result) == Outcome::RetryableFailure && !policy.is_last(attempt) {
            tracing::debug!(
                client = info.client,
                kind = %transport.kind(),
                destination = info.destination,
                attempt = attempt + 1,
                max_attempts = policy.max_attempts(),
                status = last_status,
                "Retrying after retryable failure"
            );
            attempt += 1;
            continue;
        }

        return finalize(result, attempt + 1, last_status, info);
    }
}

/// Builds the terminal response for the attempt that ended the loop.
fn finalize(result: Attempt, attempts: u32, last_status: u16, info: &CallInfo<'_>) -> Response {
    match result {
        Attempt::Status {
            code,
            headers,
            body,
        } => match classify_status(code) {
            Outcome::Success => Response::success(code, headers, body, attempts),
            Outcome::RetryableFailure => Response::failure(
                FetchError::MaxRetriesExceeded { status: code },
                code,
                attempts,
            ),
            Outcome::FatalFailure => {
                Response::failure(FetchError::UnexpectedStatus(code), code, attempts)
            }
        },
        Attempt::Published => Response::success(200, Headers::new(), Body::Absent, attempts),
        Attempt::Rejected(source) => Response::failure(
            FetchError::Publish {
                destination: info.destination.to_string(),
                source,
            },
            last_status,
            attempts,
        ),
        Attempt::Failed(err) => Response::failure(FetchError::Transport(err), last_status, attempts),
    }
}
