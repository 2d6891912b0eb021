pub mod member;
pub mod membership;
pub mod realm;
pub mod search;
pub mod settings;

pub use member::*;
pub use membership::*;
pub use realm::*;
pub use search::*;
pub use settings::*;
