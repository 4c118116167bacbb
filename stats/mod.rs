// Numeric building blocks shared by scoring, significance testing, and coverage.
pub mod correction;
pub mod correlation;
pub mod io;
pub mod rank;
pub mod significance;
pub mod wilcoxon;

pub use correlation::{CorrelationError, pearson, spearman};
pub use significance::{
    PairwiseTestResult, SignificanceError, SignificanceReport, SignificanceTester,
};
pub use wilcoxon::{PValueMethod, WilcoxonError, WilcoxonResult, wilcoxon_signed_rank};
