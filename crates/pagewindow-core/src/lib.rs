// Windowed pagination core: sectioned and flat windows over an external store

pub mod config;
pub mod error;
pub mod flat;
pub mod journal;
pub mod merge;
pub mod ordered_map;
pub mod sections;
pub mod source;
pub mod surface;
pub mod test_utils;
pub mod translator;
pub mod types;

pub use config::WindowConfig;
pub use error::{Result, SourceError, WindowError};
pub use flat::{FlatWindow, PageLoad};
pub use merge::LoadedBatch;
pub use sections::{
    ItemRef, ItemRemoval, NewItemsOutcome, RemovedItems, SectionReloads, SectionedWindow,
};
pub use source::{MessageSource, SectionSource};
pub use surface::{OperationLog, RenderSurface, SurfaceOp};
pub use translator::{UpdateBatch, translate};
pub use types::{
    EnumerationCompletion, GalleryMonth, IndexPath, RowId, SectionItem, Slot, WindowItem,
};
