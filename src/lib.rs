//! # webfs
//!
//! Thumbnails for a directory tree exposed over the web. Given any file or
//! directory below the mount, webfs produces a small JPEG preview and keeps
//! it in a cache until the source changes.
//!
//! # Architecture
//!
//! ```text
//! request path ──► fs::Filesystem ──► thumb::thumb_file ──► cache::cache_file
//!                  (clean, resolve)    (registry lookup)      (fresh? serve : render + store)
//!                                             │
//!                                             ▼
//!                                   Thumber: image | vector | video | directory
//! ```
//!
//! A request is resolved to a [`fs::Resource`], the first registered
//! [`thumb::Thumber`] that accepts it renders an image, and the JPEG bytes are
//! stored under a key made of the resource path and the requested size. The
//! cache entry's creation time is compared with the source's modification
//! time on every request, so editing a file is enough to refresh its preview.
//! JPEG and PNG images also get a display-sized copy ([`fs::Filesystem::view`])
//! cached the same way under the `view` label.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`cache`] | Cache contract, keyed locking, memory and disk backends, the cache-or-produce orchestrator |
//! | [`thumb`] | Thumber contract, registry, MIME detection, the individual Thumbers |
//! | [`fs`] | Mounted tree: request path cleaning, resources, views, invalidation |
//! | [`pregen`] | Walk the whole mount and fill the cache in parallel |
//! | [`config`] | `webfs.toml` loading, validation, and layering |
//! | [`logging`] | `tracing` subscriber setup for the binary |
//!
//! # Design Decisions
//!
//! ## One Writer Per Key
//!
//! Every cache key has its own reader/writer lock. Readers of a committed
//! entry share it; a writer excludes everyone until it commits or is
//! dropped. A reader therefore never sees a half-written thumbnail, and two
//! requests for the same missing thumbnail render it once: the second waits
//! for the first, then finds a fresh entry.
//!
//! ## Disk Entries Survive Restarts
//!
//! The disk backend names each file after a SHA-1 of the resource path plus
//! the size label, and stores the entry's creation time as the file's
//! modification time. Reopening a directory rebuilds the lock table from the
//! files already there. Writes land in a `.partial` file that is renamed into
//! place on commit, so a crash never leaves a truncated entry under a real
//! name.
//!
//! ## External Tools Are Optional
//!
//! Raster images are handled in-process by the `image` crate. Vector
//! documents need `inkscape`, videos need `ffmpeg` and `ffprobe`. Tools are
//! located once at startup; when one is missing its Thumber is simply not
//! registered and those files report "no thumbnail".
//!
//! ## Bounded Mosaics
//!
//! A directory without an icon is previewed as a grid of its children's
//! thumbnails. Rendering a child that is itself a directory would recurse, so
//! the depth is carried in a [`thumb::RenderContext`] and capped (one level by
//! default, which leaves subdirectories out of their parent's mosaic).

pub mod cache;
pub mod config;
pub mod fs;
pub mod logging;
pub mod pregen;
pub mod thumb;

#[cfg(test)]
pub(crate) mod test_helpers;
