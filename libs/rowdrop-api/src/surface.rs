/// Display container receiving rendered markup.
///
/// Painting replaces the whole content; the engine only paints when the
/// markup actually changed.
pub trait DisplaySurface: Send + Sync {
    fn paint(&self, markup: &str);
}
