use std::fmt::Debug;
use std::hash::Hash;

/// A trait for application messages carried by a connection.
///
/// Messages are usually a single enum covering the whole protocol. `Kind` is its
/// fieldless discriminant and is what handler tables are keyed by, so dispatch never
/// needs runtime type inspection.
///
/// # Example
/// ```ignore
/// #[derive(Serialize, Deserialize, EnumDiscriminants)]
/// #[strum_discriminants(derive(Hash), name(ChatKind))]
/// enum Chat {
///     Say(String),
///     Leave,
/// }
///
/// impl Message for Chat {
///     type Kind = ChatKind;
///     fn kind(&self) -> ChatKind {
///         self.into()
///     }
/// }
/// ```
pub trait Message: Send + 'static {
    /// Discriminator used to select a handler.
    type Kind: Copy + Eq + Hash + Debug + Send + Sync + 'static;

    /// Returns the discriminator of this message.
    fn kind(&self) -> Self::Kind;
}
