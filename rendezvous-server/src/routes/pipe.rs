use axum::body::{Body, Bytes};
use axum::extract::{FromRequest, Multipart, Path, Query, Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::AppError;
use crate::pipe::fanout::{self, FanoutError, PartHeaders};
use crate::pipe::{self, GuardedStream, PipeError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PipeQuery {
    pub n: Option<i64>,
}

pub async fn get_pipe(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<PipeQuery>,
) -> Result<Response, AppError> {
    let key = format!("/p/{path}");
    match query.n {
        Some(n) => get_fanout(state, key, n).await,
        None => get_simple(state, key).await,
    }
}

pub async fn put_pipe(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<PipeQuery>,
    req: Request,
) -> Result<Response, AppError> {
    let key = format!("/p/{path}");
    match query.n {
        Some(n) => put_fanout(state, key, n, req).await,
        None => put_simple(state, key, req).await,
    }
}

async fn get_simple(state: AppState, key: String) -> Result<Response, AppError> {
    let (header_rx, body_rx, guard) = pipe::accept_reader(state.pipes.clone(), key.clone())
        .await
        .map_err(pipe_error_to_app)?;

    let header = header_rx
        .await
        .map_err(|_| AppError::Cancelled("writer disconnected before sending".into()))?;
    let content_type = header
        .content_type
        .unwrap_or_else(|| guess_mime(&key).to_string());

    let stream = GuardedStream::new(ReceiverStream::new(body_rx), guard);
    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    Ok(response)
}

async fn put_simple(state: AppState, key: String, req: Request) -> Result<Response, AppError> {
    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let (handoff, cancel, guard) = pipe::accept_writer(state.pipes.clone(), key)
        .await
        .map_err(pipe_error_to_app)?;

    let _ = handoff.header_tx.send(pipe::HeaderInfo { content_type });

    let body_stream = req.into_body().into_data_stream();
    let result = pipe::copy_cancelable(body_stream, &handoff.body_tx, &cancel).await;
    drop(handoff.body_tx);

    match result {
        Ok(_) => {
            guard.finish();
            Ok((StatusCode::OK, "").into_response())
        }
        Err(PipeError::Cancelled) => Err(AppError::Cancelled("reader disconnected".into())),
        Err(err) => Err(pipe_error_to_app(err)),
    }
}

async fn get_fanout(state: AppState, key: String, n: i64) -> Result<Response, AppError> {
    let n = fanout::validate_n(n).map_err(fanout_error_to_app)?;
    let (header_rx, body_rx, guard) = fanout::join_receiver(state.fanout.clone(), key, n)
        .await
        .map_err(fanout_error_to_app)?;

    // Waits for the sender to connect and contribute its (possibly
    // part-derived) headers; dropping the guard on a client disconnect
    // before that happens unregisters this receiver same as any other
    // abort.
    let part_headers = header_rx.await.unwrap_or_default();

    let stream = GuardedStream::new(ReceiverStream::new(body_rx), guard);
    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    if let Some(content_type) = part_headers
        .content_type
        .and_then(|ct| HeaderValue::from_str(&ct).ok())
    {
        headers.insert(header::CONTENT_TYPE, content_type);
    }
    if let Some(content_disposition) = part_headers
        .content_disposition
        .and_then(|cd| HeaderValue::from_str(&cd).ok())
    {
        headers.insert(header::CONTENT_DISPOSITION, content_disposition);
    }
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static("Content-Length, Content-Type"),
    );
    headers.insert(
        header::HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    Ok(response)
}

/// Sender body as a byte stream plus the headers to forward to
/// receivers, having already peeled off the first part of a
/// multipart body if that's what was sent.
type ForwardStream = BoxStream<'static, Result<Bytes, ()>>;

async fn put_fanout(state: AppState, key: String, n: i64, req: Request) -> Result<Response, AppError> {
    let n = fanout::validate_n(n).map_err(fanout_error_to_app)?;
    let (part_headers, body_stream) = extract_part(req).await?;

    let sender = fanout::join_sender(state.fanout.clone(), key, n, part_headers)
        .await
        .map_err(fanout_error_to_app)?;
    let (info_rx, driver) = sender.split();

    tokio::spawn(forward_to_receivers(body_stream, driver));

    let mut response = Response::new(Body::from_stream(ReceiverStream::new(info_rx).map(Ok::<
        _,
        std::io::Error,
    >)));
    *response.status_mut() = StatusCode::OK;
    Ok(response)
}

async fn forward_to_receivers(mut body_stream: ForwardStream, driver: fanout::SenderDriver) {
    while let Some(chunk) = body_stream.next().await {
        match chunk {
            Ok(bytes) => {
                driver.broadcast(bytes).await;
            }
            Err(()) => break,
        }
    }
    driver.finish().await;
}

/// Pulls out the headers and byte stream the rest of the fan-out
/// forwards to receivers. For a `multipart/*` body this means parsing
/// out the first part and using its own `Content-Type`/
/// `Content-Disposition` instead of the outer request's, matching
/// `runPipe`'s `mime.ParseMediaType` + `multipart.NextPart` handling
/// in the original. `text/html` is rewritten to `text/plain` either
/// way so a receiver's browser renders the payload as raw text
/// instead of executing it, the same as GitHub Raw.
async fn extract_part(req: Request) -> Result<(PartHeaders, ForwardStream), AppError> {
    let outer_content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let is_multipart = outer_content_type
        .as_deref()
        .is_some_and(|ct| ct.starts_with("multipart/"));

    if !is_multipart {
        let headers = PartHeaders {
            content_type: rewrite_html_to_plain(outer_content_type),
            content_disposition: req
                .headers()
                .get(header::CONTENT_DISPOSITION)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string()),
        };
        let stream = req
            .into_body()
            .into_data_stream()
            .map(|chunk| chunk.map_err(|_| ()))
            .boxed();
        return Ok((headers, stream));
    }

    let mut multipart = Multipart::from_request(req, &())
        .await
        .map_err(|err| AppError::Validation(format!("invalid multipart body: {err}")))?;
    let field = multipart
        .next_field()
        .await
        .map_err(|err| AppError::Validation(format!("invalid multipart body: {err}")))?
        .ok_or_else(|| AppError::Validation("multipart body has no parts".into()))?;

    let headers = PartHeaders {
        content_type: rewrite_html_to_plain(field.content_type().map(|s| s.to_string())),
        content_disposition: field
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string()),
    };
    let stream = field.map(|chunk| chunk.map_err(|_| ())).boxed();
    Ok((headers, stream))
}

/// "text/plain" can be considered a superordinate concept of
/// "text/html" for the purposes of not letting a receiver's browser
/// render a posted payload.
fn rewrite_html_to_plain(content_type: Option<String>) -> Option<String> {
    content_type.map(|ct| {
        let mime = ct.split(';').next().unwrap_or("").trim();
        if mime.eq_ignore_ascii_case("text/html") {
            ct.replacen(mime, "text/plain", 1)
        } else {
            ct
        }
    })
}

fn guess_mime(path: &str) -> &'static str {
    let ext = path.rsplit('.').next().unwrap_or("");
    match ext {
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    }
}

fn pipe_error_to_app(err: PipeError) -> AppError {
    match err {
        PipeError::DuplicateReader => AppError::Conflict("reader already connected".into()),
        PipeError::DuplicateWriter => AppError::Conflict("writer already connected".into()),
        PipeError::Cancelled => AppError::Cancelled("pipe cancelled".into()),
    }
}

fn fanout_error_to_app(err: FanoutError) -> AppError {
    match err {
        FanoutError::InvalidN => AppError::Validation("n must be a positive integer".into()),
        FanoutError::Mismatch => AppError::Validation("n does not match the sender".into()),
        FanoutError::DuplicateSender => AppError::Validation("sender already connected".into()),
        FanoutError::OverSubscribed => AppError::Validation("receiver count exceeds n".into()),
    }
}
