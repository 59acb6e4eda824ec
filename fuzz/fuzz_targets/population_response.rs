#![no_main]

use std::io::{Cursor, Read};
use std::pin::Pin;
use std::sync::OnceLock;
use std::task::{Context, Poll};
use std::time::Duration;

use libfuzzer_sys::fuzz_target;
use tokio::io::{AsyncRead, BufReader, ReadBuf};

use cachefill::populate::fuzzing::read_population_response;

struct CursorRead {
    inner: Cursor<Vec<u8>>,
}

impl AsyncRead for CursorRead {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let unfilled = buf.initialize_unfilled();
        let read = Read::read(&mut self.inner, unfilled)?;
        buf.advance(read);
        Poll::Ready(Ok(()))
    }
}

fn runtime() -> &'static tokio::runtime::Runtime {
    static RUNTIME: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
    RUNTIME.get_or_init(|| {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("build tokio runtime")
    })
}

fuzz_target!(|data: &[u8]| {
    let max_body = data.len().clamp(1, 4096);

    runtime().block_on(async {
        let mut reader = BufReader::new(CursorRead {
            inner: Cursor::new(data.to_vec()),
        });
        if let Ok((_, body)) =
            read_population_response(&mut reader, Duration::from_millis(10), 8 * 1024, max_body)
                .await
        {
            assert!(body.len() <= max_body.saturating_mul(4));
        }
    });
});
