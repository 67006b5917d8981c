//! In-memory connection driving.

use std::io;

use futures::FutureExt as _;
use portolan::{
    Dispatcher,
    Envelope,
    SvpCodec,
    codec::FrameAssembler,
    connection::serve_connection,
    message::decode,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};
use tokio_util::sync::CancellationToken;

use crate::frames::pipeline;

/// Duplex buffer size used by the helpers.
pub const DEFAULT_CAPACITY: usize = 64 * 1024;

/// Serve one connection with `dispatcher`, write each element of `wire` to
/// it, half-close, and return every byte the server wrote back.
///
/// A panic in the server task is surfaced as an `io::Error` beginning with
/// `"server task failed"`.
///
/// # Errors
///
/// Returns any I/O error on the client half, or the server task failure.
pub async fn drive_with_frames(dispatcher: Dispatcher, wire: Vec<Vec<u8>>) -> io::Result<Vec<u8>> {
    let (mut client, server) = duplex(DEFAULT_CAPACITY);

    let server_fut = async {
        let result = std::panic::AssertUnwindSafe(serve_connection(
            server,
            SvpCodec::default(),
            dispatcher,
            CancellationToken::new(),
        ))
        .catch_unwind()
        .await;
        match result {
            // Truncated input is a legitimate scenario to drive; callers
            // inspect the output rather than the close reason.
            Ok(_) => Ok(()),
            Err(panic) => {
                let message = portolan::panic::payload_message(panic.as_ref());
                Err(io::Error::other(format!("server task failed: {message}")))
            }
        }
    };

    let client_fut = async {
        for chunk in &wire {
            client.write_all(chunk).await?;
        }
        client.shutdown().await?;

        let mut buf = Vec::new();
        client.read_to_end(&mut buf).await?;
        io::Result::Ok(buf)
    };

    let ((), buf) = tokio::try_join!(server_fut, client_fut)?;
    Ok(buf)
}

/// Send `requests` on one connection and decode the replies.
///
/// # Errors
///
/// See [`drive_with_frames`] and [`decode_responses`].
pub async fn drive_with_envelopes(
    dispatcher: Dispatcher,
    requests: &[Envelope],
) -> io::Result<Vec<Envelope>> {
    let bytes = drive_with_frames(dispatcher, vec![pipeline(requests)]).await?;
    decode_responses(&bytes)
}

/// Split server output into frames and decode each one.
///
/// # Errors
///
/// Returns `InvalidData` if the output ends mid-frame or a frame does not
/// decode.
pub fn decode_responses(bytes: &[u8]) -> io::Result<Vec<Envelope>> {
    let mut assembler = FrameAssembler::new(SvpCodec::default());
    let frames = assembler.push(bytes);
    assembler
        .finish()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    frames
        .iter()
        .map(|frame| decode(frame).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)))
        .collect()
}
