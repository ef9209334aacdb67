use std::io::SeekFrom;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::net::unix::pipe;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::decoder::{FrameDecoder, FRAME_LEN};
use crate::session::CommandSlot;
use crate::symbol::Symbol;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("could not open input channel {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("input channel error: {0}")]
    Io(#[from] std::io::Error),

    #[error("input frame is not valid text: {0}")]
    Decode(#[from] std::str::Utf8Error),

    #[error("input channel closed")]
    Closed,
}

pub type SymbolStream = BoxStream<'static, Result<Symbol, Error>>;

/// Opens the command channel written by the gesture relay.
///
/// A named pipe is read as a continuous stream of frames. A regular file is
/// treated as a snapshot that the relay overwrites in place: it is rewound
/// and re-read every `poll` interval.
pub async fn open(path: &Path, poll: Duration) -> Result<SymbolStream, Error> {
    let open_error = |source| Error::Open {
        path: path.to_owned(),
        source,
    };

    let metadata = tokio::fs::metadata(path).await.map_err(open_error)?;
    if metadata.file_type().is_fifo() {
        // opened read-write, so a restarting relay never looks like EOF
        let receiver = pipe::OpenOptions::new()
            .read_write(true)
            .open_receiver(path)
            .map_err(open_error)?;
        info!("Reading commands from pipe {}", path.display());
        Ok(FramedRead::new(receiver, FrameDecoder {}).boxed())
    } else {
        let file = File::open(path).await.map_err(open_error)?;
        info!(
            "Polling commands from {} every {poll:?}",
            path.display()
        );
        Ok(poll_snapshot(file, poll))
    }
}

fn poll_snapshot(file: File, poll: Duration) -> SymbolStream {
    stream::try_unfold(file, move |mut file| async move {
        tokio::time::sleep(poll).await;
        file.seek(SeekFrom::Start(0)).await?;
        // short snapshots are normal: unpadded frames, or a rewrite caught
        // between truncate and write, which reads as empty (idle)
        let mut frame = [0u8; FRAME_LEN];
        let n = file.read(&mut frame).await?;
        let symbol = Symbol::decode(&frame[..n])?;
        Ok::<_, Error>(Some((symbol, file)))
    })
    .boxed()
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PumpStats {
    pub reads: usize,
    pub published: usize,
}

/// Input pump: moves symbols from `source` into the command slot.
///
/// Only symbols that differ from the previously read one are published.
/// Returns once the stop symbol has been read or `shutdown` fires. A closed
/// or undecodable channel ends the pump with an error.
pub async fn pump<S>(
    mut source: S,
    slot: CommandSlot,
    shutdown: CancellationToken,
) -> Result<PumpStats, Error>
where
    S: Stream<Item = Result<Symbol, Error>> + Unpin,
{
    let mut stats = PumpStats::default();
    let mut last = slot.latest();

    while last != Symbol::Stop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!("Input pump cancelled");
                break;
            }
            next = source.next() => next,
        };
        let symbol = next.ok_or(Error::Closed)??;
        stats.reads += 1;

        if symbol != last {
            trace!("Publishing {symbol}");
            slot.publish(symbol);
            last = symbol;
            stats.published += 1;
        }
    }

    Ok(stats)
}
