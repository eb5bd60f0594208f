//! SeaORM entity models

mod clipping;
mod epaper;
mod paper;
mod sequence_counter;

pub use epaper::{
    Entity as EpaperEntity,
    Model as EpaperRow,
    ActiveModel as EpaperActiveModel,
    Column as EpaperColumn,
};

pub use paper::{
    Entity as PaperEntity,
    Model as PaperRow,
    ActiveModel as PaperActiveModel,
    Column as PaperColumn,
};

pub use clipping::{
    Entity as ClippingEntity,
    Model as ClippingRow,
    ActiveModel as ClippingActiveModel,
    Column as ClippingColumn,
};

pub use sequence_counter::{
    Entity as SequenceCounterEntity,
    Model as SequenceCounterRow,
    Column as SequenceCounterColumn,
};
