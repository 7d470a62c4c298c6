/// The closed set of film channels.
///
/// Each kind maps to one concretely-typed buffer inside [`crate::Film`];
/// there is no open-ended runtime channel dispatch.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum ChannelKind {
    /// RGB sums plus a per-pixel sample weight; display value is sum / weight.
    /// Fed by samples traced from the observer.
    RadiancePerPixelNormalized,
    /// Unweighted RGB sums; display value is sum scaled by a single
    /// image-wide factor. Fed by samples that may land on any pixel.
    RadiancePerScreenNormalized,
    /// Coverage AOV: alpha sum plus sample weight.
    Alpha,
    /// Per-pixel convergence error map written by the convergence test.
    Convergence,
    /// Per-pixel noise/importance map written by the noise estimator.
    Noise,
    /// Tonemapped RGB produced by the image pipeline.
    Display,
}

impl ChannelKind {
    /// All channel kinds, in a stable order.
    pub const ALL: [ChannelKind; 6] = [
        ChannelKind::RadiancePerPixelNormalized,
        ChannelKind::RadiancePerScreenNormalized,
        ChannelKind::Alpha,
        ChannelKind::Convergence,
        ChannelKind::Noise,
        ChannelKind::Display,
    ];
}
