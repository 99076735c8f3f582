//! Local canvas adapter.
//!
//! Owns the live drawables, runs the gesture state machine over
//! [`CanvasEvent`]s and reconciles the drawables against Document snapshots.
//! The adapter never writes to the store itself: every mutation leaves it as a
//! [`CanvasCommand`] for the mutation pipeline.

use crate::codec::{self, ShapeRecord};
use crate::config::SessionConfig;
use crate::input::{AttributeEdit, CanvasEvent, ImageUpload, Key, Modifiers};
use crate::presence::PresenceRecord;
use crate::shapes::{FontWeight, Image, ImageFormat, ObjectId, SerializableColor, Shape};
use crate::store::Document;
use crate::tools::{ToolKind, ToolManager};
use kurbo::{Point, Vec2};
use std::collections::HashMap;

/// Whether a drawable has reached the Document yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Local only: being drawn, dragged, or waiting for a successful write.
    Provisional,
    /// Matches (or matched) a record in the Document.
    Committed,
}

/// A shape on the local canvas.
#[derive(Debug, Clone, PartialEq)]
pub struct Drawable {
    pub shape: Shape,
    pub phase: Phase,
}

impl Drawable {
    pub fn provisional(shape: Shape) -> Self {
        Self {
            shape,
            phase: Phase::Provisional,
        }
    }

    pub fn committed(shape: Shape) -> Self {
        Self {
            shape,
            phase: Phase::Committed,
        }
    }

    pub fn id(&self) -> &ObjectId {
        self.shape.id()
    }

    pub fn is_provisional(&self) -> bool {
        self.phase == Phase::Provisional
    }
}

/// Drawables keyed by id, in z-order (back to front).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrawableSet {
    order: Vec<ObjectId>,
    items: HashMap<ObjectId, Drawable>,
}

impl DrawableSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a drawable. An existing drawable with the same id is replaced in
    /// place; new ones go on top.
    pub fn insert(&mut self, drawable: Drawable) {
        let id = drawable.id().clone();
        if !self.items.contains_key(&id) {
            self.order.push(id.clone());
        }
        self.items.insert(id, drawable);
    }

    pub fn remove(&mut self, id: &ObjectId) -> Option<Drawable> {
        let removed = self.items.remove(id)?;
        self.order.retain(|other| other != id);
        Some(removed)
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.items.clear();
    }

    pub fn get(&self, id: &ObjectId) -> Option<&Drawable> {
        self.items.get(id)
    }

    pub fn get_mut(&mut self, id: &ObjectId) -> Option<&mut Drawable> {
        self.items.get_mut(id)
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.items.contains_key(id)
    }

    /// Drawables back to front.
    pub fn iter(&self) -> impl Iterator<Item = &Drawable> {
        self.order.iter().filter_map(|id| self.items.get(id))
    }

    pub fn shapes(&self) -> impl Iterator<Item = &Shape> {
        self.iter().map(|d| &d.shape)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Topmost shape under `point`.
    pub fn shape_at(&self, point: Point, tolerance: f64) -> Option<ObjectId> {
        self.order
            .iter()
            .rev()
            .find(|id| {
                self.items
                    .get(*id)
                    .is_some_and(|d| d.shape.hit_test(point, tolerance))
            })
            .cloned()
    }
}

/// What a reconciliation pass changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    pub added: Vec<ObjectId>,
    pub updated: Vec<ObjectId>,
    pub removed: Vec<ObjectId>,
    /// Records that could not be decoded.
    pub skipped: Vec<ObjectId>,
}

impl ReconcileReport {
    /// True when the pass left the drawables untouched.
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Result of [`reconcile`].
#[derive(Debug, Clone)]
pub struct Reconciled {
    pub drawables: DrawableSet,
    pub report: ReconcileReport,
}

/// Bring `current` in line with `document`.
///
/// Committed drawables follow the Document: updated when their record
/// changed, removed when it is gone. Provisional drawables are kept and
/// become committed once the Document holds exactly their record. Records
/// missing locally are appended in key order. Undecodable records are logged
/// and skipped; a committed drawable whose record became undecodable keeps its
/// last good state.
///
/// Pure and idempotent: reconciling the result against the same Document
/// changes nothing.
pub fn reconcile(document: &Document, current: &DrawableSet) -> Reconciled {
    let mut drawables = DrawableSet::new();
    let mut report = ReconcileReport::default();

    for drawable in current.iter() {
        let id = drawable.id();
        let Some(record) = document.get(id) else {
            if drawable.is_provisional() {
                drawables.insert(drawable.clone());
            } else {
                report.removed.push(id.clone());
            }
            continue;
        };
        let shape = match decode(id, record) {
            Some(shape) => shape,
            None => {
                report.skipped.push(id.clone());
                drawables.insert(drawable.clone());
                continue;
            }
        };
        match drawable.phase {
            Phase::Provisional if shape != drawable.shape => drawables.insert(drawable.clone()),
            Phase::Provisional => drawables.insert(Drawable::committed(shape)),
            Phase::Committed => {
                if shape != drawable.shape {
                    report.updated.push(id.clone());
                }
                drawables.insert(Drawable::committed(shape));
            }
        }
    }

    for (id, record) in document {
        if current.contains(id) {
            continue;
        }
        match decode(id, record) {
            Some(shape) => {
                report.added.push(id.clone());
                drawables.insert(Drawable::committed(shape));
            }
            None => report.skipped.push(id.clone()),
        }
    }

    Reconciled { drawables, report }
}

fn decode(key: &ObjectId, record: &ShapeRecord) -> Option<Shape> {
    match codec::deserialize(record) {
        Ok(shape) if shape.id() == key => Some(shape),
        Ok(shape) => {
            log::warn!("Skipping record under {} claiming id {}", key, shape.id());
            None
        }
        Err(e) => {
            log::warn!("Skipping record {}: {}", key, e);
            None
        }
    }
}

/// Current interaction gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GestureState {
    #[default]
    Idle,
    /// A shape tool is dragging out a provisional shape.
    Drawing,
    /// A freehand stroke is being collected.
    Freehand,
    /// An existing shape is being moved or scaled.
    Selected,
}

/// A mutation the adapter asks the pipeline to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum CanvasCommand {
    Commit(Shape),
    Delete(ObjectId),
    DeleteAll,
    Undo,
    Redo,
}

/// Attribute panel values for the selected shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementAttributes {
    pub kind: &'static str,
    pub width: f64,
    pub height: f64,
    pub font_size: Option<f64>,
    pub font_family: Option<String>,
    pub font_weight: Option<FontWeight>,
    pub fill: Option<SerializableColor>,
    pub stroke: SerializableColor,
    pub stroke_width: f64,
    pub opacity: f64,
}

/// The local canvas: drawables, tools, selection and gesture state.
#[derive(Debug, Clone)]
pub struct CanvasAdapter {
    drawables: DrawableSet,
    tools: ToolManager,
    state: GestureState,
    selected: Option<ObjectId>,
    /// Last pointer position of an in-progress drag.
    drag: Option<Point>,
    /// The selection was modified locally and not yet committed.
    dirty: bool,
    clipboard: Option<Shape>,
    presence: PresenceRecord,
    hit_tolerance: f64,
    paste_offset: f64,
    image_max_dimension: f64,
}

impl Default for CanvasAdapter {
    fn default() -> Self {
        Self::new(&SessionConfig::default())
    }
}

impl CanvasAdapter {
    pub fn new(config: &SessionConfig) -> Self {
        let mut tools = ToolManager::new();
        tools.current_style = config.shape_style();
        tools.freehand_style = config.freehand_style();
        tools.default_size = config.default_shape_size;
        tools.freehand_tolerance = config.freehand_tolerance;
        Self {
            drawables: DrawableSet::new(),
            tools,
            state: GestureState::Idle,
            selected: None,
            drag: None,
            dirty: false,
            clipboard: None,
            presence: PresenceRecord {
                cursor_color: Some(config.cursor_color.clone()),
                ..Default::default()
            },
            hit_tolerance: config.hit_tolerance,
            paste_offset: config.paste_offset,
            image_max_dimension: config.image_max_dimension,
        }
    }

    /// Run one input event through the state machine.
    pub fn handle(&mut self, event: CanvasEvent) -> Vec<CanvasCommand> {
        match event {
            CanvasEvent::PointerDown(point) => self.pointer_down(point),
            CanvasEvent::PointerMove(point) => {
                self.pointer_move(point);
                Vec::new()
            }
            CanvasEvent::PointerUp { position, inside } => self.pointer_up(position, inside),
            CanvasEvent::PointerLeft => {
                self.presence.cursor = None;
                Vec::new()
            }
            CanvasEvent::ToolSelected(tool) => {
                self.cancel_gesture();
                let commands = self.select(None);
                self.tools.set_tool(tool);
                commands
            }
            CanvasEvent::DeleteSelected => self.delete_selected(),
            CanvasEvent::Reset => self.reset(),
            CanvasEvent::Key { key, modifiers } => self.key(key, modifiers),
            CanvasEvent::ScaleSelected { sx, sy } => {
                if let Some(drawable) = self.selected_drawable_mut() {
                    drawable.shape.scale(sx, sy);
                    drawable.phase = Phase::Provisional;
                    self.dirty = true;
                }
                Vec::new()
            }
            CanvasEvent::ModificationEnded => {
                self.end_drag();
                self.finish_modification()
            }
            CanvasEvent::AttributeEdited(edit) => self.edit_attribute(edit),
            CanvasEvent::TextEdited(content) => self.edit_text(content),
            CanvasEvent::ImageSelected(upload) => self.place_image(upload),
            CanvasEvent::Undo => self.history_command(CanvasCommand::Undo),
            CanvasEvent::Redo => self.history_command(CanvasCommand::Redo),
            CanvasEvent::ChatMessage(message) => {
                self.presence.message = message;
                Vec::new()
            }
        }
    }

    fn pointer_down(&mut self, point: Point) -> Vec<CanvasCommand> {
        self.presence.cursor = Some(point);
        if self.tools.current_tool.creates_shape() {
            let commands = self.select(None);
            let freehand = self.tools.current_tool == ToolKind::Freehand;
            if let Some(preview) = self.tools.begin(point).cloned() {
                self.drawables.insert(Drawable::provisional(preview));
                self.state = if freehand {
                    GestureState::Freehand
                } else {
                    GestureState::Drawing
                };
            }
            return commands;
        }

        match self.drawables.shape_at(point, self.hit_tolerance) {
            Some(id) => {
                let commands = self.select(Some(id));
                self.drag = Some(point);
                self.state = GestureState::Selected;
                commands
            }
            None => {
                self.state = GestureState::Idle;
                self.select(None)
            }
        }
    }

    fn pointer_move(&mut self, point: Point) {
        self.presence.cursor = Some(point);
        match self.state {
            GestureState::Drawing | GestureState::Freehand => {
                if let Some(preview) = self.tools.update(point).cloned() {
                    self.drawables.insert(Drawable::provisional(preview));
                }
            }
            GestureState::Selected => {
                let Some(last) = self.drag else { return };
                let delta = point - last;
                if delta == Vec2::ZERO {
                    return;
                }
                self.drag = Some(point);
                if let Some(drawable) = self.selected_drawable_mut() {
                    drawable.shape.translate(delta);
                    drawable.phase = Phase::Provisional;
                    self.dirty = true;
                }
            }
            GestureState::Idle => {}
        }
    }

    fn pointer_up(&mut self, position: Point, inside: bool) -> Vec<CanvasCommand> {
        match self.state {
            GestureState::Drawing | GestureState::Freehand => {
                self.state = GestureState::Idle;
                if !inside {
                    if let Some(id) = self.tools.cancel() {
                        self.drawables.remove(&id);
                        log::debug!("Abandoned drawing {}", id);
                    }
                    return Vec::new();
                }
                self.tools.update(position);
                let preview = self.tools.preview_shape().map(|s| s.id().clone());
                let finished = self.tools.end();
                self.tools.set_tool(ToolKind::Select);
                match finished {
                    Some(shape) => {
                        self.drawables.insert(Drawable::provisional(shape.clone()));
                        vec![CanvasCommand::Commit(shape)]
                    }
                    None => {
                        if let Some(id) = preview {
                            self.drawables.remove(&id);
                        }
                        Vec::new()
                    }
                }
            }
            GestureState::Selected => {
                self.end_drag();
                self.finish_modification()
            }
            GestureState::Idle => Vec::new(),
        }
    }

    fn key(&mut self, key: Key, modifiers: Modifiers) -> Vec<CanvasCommand> {
        match key {
            Key::Delete | Key::Backspace => self.delete_selected(),
            Key::Escape => {
                self.cancel_gesture();
                self.end_drag();
                self.select(None)
            }
            Key::Character(c) if modifiers.command() => match c {
                'z' if modifiers.shift => self.history_command(CanvasCommand::Redo),
                'z' => self.history_command(CanvasCommand::Undo),
                'y' => self.history_command(CanvasCommand::Redo),
                'c' => {
                    if let Some(shape) = self.selected_shape() {
                        self.clipboard = Some(shape.clone());
                    }
                    Vec::new()
                }
                'v' => self.paste(),
                _ => Vec::new(),
            },
            Key::Character(_) => Vec::new(),
        }
    }

    fn paste(&mut self) -> Vec<CanvasCommand> {
        let Some(mut shape) = self.clipboard.clone() else {
            return Vec::new();
        };
        shape.regenerate_id();
        shape.translate(Vec2::new(self.paste_offset, self.paste_offset));
        // The next paste is offset from this copy.
        self.clipboard = Some(shape.clone());
        self.place(shape)
    }

    fn place_image(&mut self, upload: ImageUpload) -> Vec<CanvasCommand> {
        let Some(format) = ImageFormat::sniff(&upload.bytes) else {
            log::warn!("Ignoring image upload of unsupported format");
            return Vec::new();
        };
        self.cancel_gesture();
        self.tools.set_tool(ToolKind::Select);
        let image = Image::new(
            upload.position.unwrap_or(Point::ZERO),
            &upload.bytes,
            upload.width,
            upload.height,
            format,
        )
        .fit_within(self.image_max_dimension, self.image_max_dimension);
        self.place(Shape::Image(image))
    }

    /// Add a finished shape, select it and commit it.
    fn place(&mut self, shape: Shape) -> Vec<CanvasCommand> {
        let mut commands = self.select(Some(shape.id().clone()));
        self.drawables.insert(Drawable::provisional(shape.clone()));
        commands.push(CanvasCommand::Commit(shape));
        commands
    }

    fn delete_selected(&mut self) -> Vec<CanvasCommand> {
        self.cancel_gesture();
        self.end_drag();
        self.dirty = false;
        let Some(id) = self.selected.take() else {
            return Vec::new();
        };
        self.presence.editing = None;
        self.drawables.remove(&id);
        vec![CanvasCommand::Delete(id)]
    }

    fn reset(&mut self) -> Vec<CanvasCommand> {
        self.cancel_gesture();
        self.end_drag();
        self.dirty = false;
        self.selected = None;
        self.presence.editing = None;
        self.drawables.clear();
        vec![CanvasCommand::DeleteAll]
    }

    fn edit_attribute(&mut self, edit: AttributeEdit) -> Vec<CanvasCommand> {
        let Some(drawable) = self.selected_drawable_mut() else {
            self.edit_tool_style(&edit);
            return Vec::new();
        };
        if !apply_attribute(&mut drawable.shape, edit) {
            return Vec::new();
        }
        drawable.phase = Phase::Provisional;
        let shape = drawable.shape.clone();
        self.dirty = false;
        vec![CanvasCommand::Commit(shape)]
    }

    /// With nothing selected, colour edits apply to the shapes drawn next.
    fn edit_tool_style(&mut self, edit: &AttributeEdit) {
        match edit {
            AttributeEdit::Fill(fill) => self.tools.current_style.fill = *fill,
            AttributeEdit::Stroke(stroke) => {
                self.tools.current_style.stroke = *stroke;
                self.tools.freehand_style.stroke = *stroke;
            }
            AttributeEdit::StrokeWidth(width) if width.is_finite() && *width >= 0.0 => {
                self.tools.current_style.stroke_width = *width;
            }
            _ => {}
        }
    }

    fn edit_text(&mut self, content: String) -> Vec<CanvasCommand> {
        let Some(drawable) = self.selected_drawable_mut() else {
            return Vec::new();
        };
        let Some(text) = drawable.shape.as_text_mut() else {
            return Vec::new();
        };
        if text.content == content {
            return Vec::new();
        }
        text.content = content;
        drawable.phase = Phase::Provisional;
        let shape = drawable.shape.clone();
        self.dirty = false;
        vec![CanvasCommand::Commit(shape)]
    }

    fn history_command(&mut self, command: CanvasCommand) -> Vec<CanvasCommand> {
        self.cancel_gesture();
        self.end_drag();
        let mut commands = self.finish_modification();
        commands.push(command);
        commands
    }

    /// Change the selection, committing a pending modification of the old one.
    fn select(&mut self, id: Option<ObjectId>) -> Vec<CanvasCommand> {
        if self.selected == id {
            return Vec::new();
        }
        let commands = self.finish_modification();
        self.drag = None;
        self.presence.editing = id.clone();
        self.selected = id;
        commands
    }

    fn finish_modification(&mut self) -> Vec<CanvasCommand> {
        if !std::mem::take(&mut self.dirty) {
            return Vec::new();
        }
        match self.selected_shape() {
            Some(shape) => vec![CanvasCommand::Commit(shape.clone())],
            None => Vec::new(),
        }
    }

    fn end_drag(&mut self) {
        self.drag = None;
        if self.state == GestureState::Selected {
            self.state = GestureState::Idle;
        }
    }

    fn cancel_gesture(&mut self) {
        if let Some(id) = self.tools.cancel() {
            self.drawables.remove(&id);
        }
        if matches!(self.state, GestureState::Drawing | GestureState::Freehand) {
            self.state = GestureState::Idle;
        }
    }

    fn selected_drawable_mut(&mut self) -> Option<&mut Drawable> {
        let id = self.selected.as_ref()?;
        self.drawables.get_mut(id)
    }

    /// Mark a drawable as written to the Document.
    pub fn mark_committed(&mut self, id: &ObjectId) {
        if let Some(drawable) = self.drawables.get_mut(id) {
            drawable.phase = Phase::Committed;
        }
    }

    /// Provisional shapes that are finished and waiting to be written,
    /// excluding the shape being drawn and an uncommitted drag.
    pub fn provisional_shapes(&self) -> Vec<Shape> {
        let preview = self.tools.preview_shape().map(Shape::id);
        let dragged = self.selected.as_ref().filter(|_| self.dirty);
        self.drawables
            .iter()
            .filter(|d| d.is_provisional())
            .filter(|d| Some(d.id()) != preview && Some(d.id()) != dragged)
            .map(|d| d.shape.clone())
            .collect()
    }

    /// Reconcile against a Document snapshot. Drops the selection if its
    /// shape disappeared.
    pub fn apply_document(&mut self, document: &Document) -> ReconcileReport {
        let Reconciled { drawables, report } = reconcile(document, &self.drawables);
        self.drawables = drawables;
        let vanished = self
            .selected
            .as_ref()
            .is_some_and(|id| !self.drawables.contains(id));
        if vanished {
            log::debug!("Selected shape was removed remotely");
            self.selected = None;
            self.presence.editing = None;
            self.dirty = false;
            self.end_drag();
        }
        report
    }

    pub fn drawables(&self) -> &DrawableSet {
        &self.drawables
    }

    pub fn state(&self) -> GestureState {
        self.state
    }

    pub fn current_tool(&self) -> ToolKind {
        self.tools.current_tool
    }

    pub fn selected(&self) -> Option<&ObjectId> {
        self.selected.as_ref()
    }

    pub fn selected_shape(&self) -> Option<&Shape> {
        let id = self.selected.as_ref()?;
        self.drawables.get(id).map(|d| &d.shape)
    }

    /// Values for the attribute panel.
    pub fn selected_attributes(&self) -> Option<ElementAttributes> {
        let shape = self.selected_shape()?;
        let bounds = shape.bounds();
        let style = shape.style();
        let text = shape.as_text();
        Some(ElementAttributes {
            kind: shape.kind(),
            width: bounds.width(),
            height: bounds.height(),
            font_size: text.map(|t| t.font_size),
            font_family: text.map(|t| t.font_family.clone()),
            font_weight: text.map(|t| t.font_weight),
            fill: style.fill,
            stroke: style.stroke,
            stroke_width: style.stroke_width,
            opacity: style.opacity,
        })
    }

    /// Local presence state, derived from input.
    pub fn presence(&self) -> &PresenceRecord {
        &self.presence
    }

    pub fn clipboard(&self) -> Option<&Shape> {
        self.clipboard.as_ref()
    }

    /// Ids and type tags in z-order, for a layer list.
    pub fn layers(&self) -> Vec<(ObjectId, &'static str)> {
        self.drawables
            .shapes()
            .map(|s| (s.id().clone(), s.kind()))
            .collect()
    }
}

/// Apply a panel edit. Returns `false` if it does not apply to this shape.
fn apply_attribute(shape: &mut Shape, edit: AttributeEdit) -> bool {
    match edit {
        AttributeEdit::Width(width) if width.is_finite() && width > 0.0 => shape.resize(Some(width), None),
        AttributeEdit::Height(height) if height.is_finite() && height > 0.0 => shape.resize(None, Some(height)),
        AttributeEdit::FontSize(size) if size.is_finite() && size > 0.0 => match shape.as_text_mut() {
            Some(text) => text.font_size = size,
            None => return false,
        },
        AttributeEdit::FontFamily(family) => match shape.as_text_mut() {
            Some(text) => text.font_family = family,
            None => return false,
        },
        AttributeEdit::FontWeight(weight) => match shape.as_text_mut() {
            Some(text) => text.font_weight = weight,
            None => return false,
        },
        AttributeEdit::Fill(fill) => shape.style_mut().fill = fill,
        AttributeEdit::Stroke(stroke) => shape.style_mut().stroke = stroke,
        AttributeEdit::StrokeWidth(width) if width.is_finite() && width >= 0.0 => {
            shape.style_mut().stroke_width = width;
        }
        AttributeEdit::Opacity(opacity) if !opacity.is_nan() => {
            shape.style_mut().opacity = opacity.clamp(0.0, 1.0);
        }
        _ => return false,
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shapes::{Rectangle, Text};
    use serde_json::json;

    fn rect_at(x: f64, y: f64) -> Shape {
        let mut rect = Rectangle::new(Point::new(x, y), 50.0, 50.0);
        rect.style.fill = Some(SerializableColor::white());
        Shape::Rectangle(rect)
    }

    fn document_of(shapes: &[&Shape]) -> Document {
        shapes
            .iter()
            .map(|s| (s.id().clone(), codec::serialize(s).unwrap()))
            .collect()
    }

    fn adapter_with(shapes: &[&Shape]) -> CanvasAdapter {
        let mut adapter = CanvasAdapter::default();
        adapter.apply_document(&document_of(shapes));
        adapter
    }

    fn down(adapter: &mut CanvasAdapter, x: f64, y: f64) -> Vec<CanvasCommand> {
        adapter.handle(CanvasEvent::PointerDown(Point::new(x, y)))
    }

    fn up(adapter: &mut CanvasAdapter, x: f64, y: f64) -> Vec<CanvasCommand> {
        adapter.handle(CanvasEvent::PointerUp {
            position: Point::new(x, y),
            inside: true,
        })
    }

    fn shortcut(c: char, modifiers: Modifiers) -> CanvasEvent {
        CanvasEvent::Key {
            key: Key::Character(c),
            modifiers,
        }
    }

    #[test]
    fn test_drawable_set_order_and_hit_test() {
        let back = rect_at(0.0, 0.0);
        let front = rect_at(25.0, 25.0);
        let mut set = DrawableSet::new();
        set.insert(Drawable::committed(back.clone()));
        set.insert(Drawable::committed(front.clone()));

        assert_eq!(set.shape_at(Point::new(30.0, 30.0), 0.0).as_ref(), Some(front.id()));
        assert_eq!(set.shape_at(Point::new(10.0, 10.0), 0.0).as_ref(), Some(back.id()));
        assert!(set.shape_at(Point::new(500.0, 500.0), 0.0).is_none());

        // Replacing keeps the z-position.
        set.insert(Drawable::provisional(back.clone()));
        let order: Vec<_> = set.iter().map(|d| d.id().clone()).collect();
        assert_eq!(order, vec![back.id().clone(), front.id().clone()]);
    }

    #[test]
    fn test_reconcile_skips_unknown_type() {
        let rect = rect_at(0.0, 0.0);
        let mut document = document_of(&[&rect]);
        let odd = ObjectId::from("odd");
        document.insert(
            odd.clone(),
            ShapeRecord::from_value(json!({ "objectId": "odd", "type": "hexagon", "sides": 6 }))
                .unwrap(),
        );

        let Reconciled { drawables, report } = reconcile(&document, &DrawableSet::new());
        assert_eq!(drawables.len(), 1);
        assert_eq!(drawables.shapes().next(), Some(&rect));
        assert_eq!(report.skipped, vec![odd]);
        assert_eq!(report.added, vec![rect.id().clone()]);
    }

    #[test]
    fn test_reconcile_skips_record_under_wrong_key() {
        let rect = rect_at(0.0, 0.0);
        let mut document = Document::new();
        document.insert(ObjectId::from("other"), codec::serialize(&rect).unwrap());

        let Reconciled { drawables, report } = reconcile(&document, &DrawableSet::new());
        assert!(drawables.is_empty());
        assert_eq!(report.skipped, vec![ObjectId::from("other")]);
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let a = rect_at(0.0, 0.0);
        let b = rect_at(100.0, 0.0);
        let pending = rect_at(200.0, 0.0);
        let document = document_of(&[&a, &b]);
        let mut current = DrawableSet::new();
        current.insert(Drawable::provisional(pending));

        let first = reconcile(&document, &current);
        let second = reconcile(&document, &first.drawables);
        assert_eq!(second.drawables, first.drawables);
        assert!(second.report.is_unchanged());
    }

    #[test]
    fn test_reconcile_updates_and_removes_committed() {
        let a = rect_at(0.0, 0.0);
        let b = rect_at(100.0, 0.0);
        let c = rect_at(200.0, 0.0);
        let mut current = DrawableSet::new();
        for shape in [&a, &b, &c] {
            current.insert(Drawable::committed(shape.clone()));
        }

        let mut moved = b.clone();
        moved.translate(Vec2::new(0.0, 30.0));
        let document = document_of(&[&a, &moved]);

        let Reconciled { drawables, report } = reconcile(&document, &current);
        assert_eq!(report.updated, vec![b.id().clone()]);
        assert_eq!(report.removed, vec![c.id().clone()]);
        let order: Vec<_> = drawables.shapes().cloned().collect();
        assert_eq!(order, vec![a, moved]);
    }

    #[test]
    fn test_reconcile_keeps_and_promotes_provisional() {
        let pending = rect_at(0.0, 0.0);
        let mut current = DrawableSet::new();
        current.insert(Drawable::provisional(pending.clone()));

        let kept = reconcile(&Document::new(), &current);
        assert!(kept.drawables.get(pending.id()).unwrap().is_provisional());

        let promoted = reconcile(&document_of(&[&pending]), &current);
        assert_eq!(
            promoted.drawables.get(pending.id()).unwrap().phase,
            Phase::Committed
        );

        // A different record under the same id does not overwrite local work.
        let mut stale = pending.clone();
        stale.translate(Vec2::new(5.0, 5.0));
        let guarded = reconcile(&document_of(&[&stale]), &current);
        assert_eq!(guarded.drawables.get(pending.id()).unwrap().shape, pending);
    }

    #[test]
    fn test_drawing_commits_once_on_pointer_up() {
        let mut adapter = CanvasAdapter::default();
        adapter.handle(CanvasEvent::ToolSelected(ToolKind::Rectangle));

        assert!(down(&mut adapter, 10.0, 10.0).is_empty());
        assert_eq!(adapter.state(), GestureState::Drawing);
        assert!(adapter
            .handle(CanvasEvent::PointerMove(Point::new(60.0, 40.0)))
            .is_empty());
        assert_eq!(adapter.drawables().len(), 1);
        assert!(adapter.provisional_shapes().is_empty());

        let commands = up(&mut adapter, 60.0, 40.0);
        let [CanvasCommand::Commit(shape)] = commands.as_slice() else {
            panic!("expected a single commit, got {commands:?}");
        };
        assert!((shape.bounds().width() - 50.0).abs() < f64::EPSILON);
        assert_eq!(adapter.state(), GestureState::Idle);
        assert_eq!(adapter.current_tool(), ToolKind::Select);
        assert_eq!(adapter.provisional_shapes(), vec![shape.clone()]);

        adapter.mark_committed(shape.id());
        assert!(adapter.provisional_shapes().is_empty());
    }

    #[test]
    fn test_release_outside_abandons_drawing() {
        let mut adapter = CanvasAdapter::default();
        adapter.handle(CanvasEvent::ToolSelected(ToolKind::Ellipse));
        down(&mut adapter, 0.0, 0.0);
        adapter.handle(CanvasEvent::PointerMove(Point::new(80.0, 80.0)));

        let commands = adapter.handle(CanvasEvent::PointerUp {
            position: Point::new(-10.0, -10.0),
            inside: false,
        });
        assert!(commands.is_empty());
        assert!(adapter.drawables().is_empty());
        assert_eq!(adapter.state(), GestureState::Idle);
    }

    #[test]
    fn test_freehand_dot_is_discarded() {
        let mut adapter = CanvasAdapter::default();
        adapter.handle(CanvasEvent::ToolSelected(ToolKind::Freehand));
        down(&mut adapter, 5.0, 5.0);
        assert_eq!(adapter.state(), GestureState::Freehand);

        assert!(up(&mut adapter, 5.0, 5.0).is_empty());
        assert!(adapter.drawables().is_empty());
    }

    #[test]
    fn test_drag_selected_commits_on_release() {
        let rect = rect_at(0.0, 0.0);
        let mut adapter = adapter_with(&[&rect]);

        assert!(down(&mut adapter, 10.0, 10.0).is_empty());
        assert_eq!(adapter.selected(), Some(rect.id()));
        assert_eq!(adapter.presence().editing.as_ref(), Some(rect.id()));

        adapter.handle(CanvasEvent::PointerMove(Point::new(30.0, 20.0)));
        let commands = up(&mut adapter, 30.0, 20.0);
        let [CanvasCommand::Commit(moved)] = commands.as_slice() else {
            panic!("expected a commit, got {commands:?}");
        };
        assert_eq!(moved.id(), rect.id());
        assert_eq!(moved.bounds().origin(), Point::new(20.0, 10.0));

        // The modification-end event after release has nothing left to commit.
        assert!(adapter.handle(CanvasEvent::ModificationEnded).is_empty());
        assert_eq!(adapter.selected(), Some(rect.id()));
    }

    #[test]
    fn test_click_without_move_commits_nothing() {
        let rect = rect_at(0.0, 0.0);
        let mut adapter = adapter_with(&[&rect]);
        down(&mut adapter, 10.0, 10.0);
        assert!(up(&mut adapter, 10.0, 10.0).is_empty());
    }

    #[test]
    fn test_scaling_commits_on_modification_end() {
        let rect = rect_at(0.0, 0.0);
        let mut adapter = adapter_with(&[&rect]);
        down(&mut adapter, 10.0, 10.0);
        up(&mut adapter, 10.0, 10.0);

        adapter.handle(CanvasEvent::ScaleSelected { sx: 2.0, sy: 1.0 });
        assert!((adapter.selected_attributes().unwrap().width - 100.0).abs() < f64::EPSILON);

        let commands = adapter.handle(CanvasEvent::ModificationEnded);
        assert!(matches!(commands.as_slice(), [CanvasCommand::Commit(_)]));
    }

    #[test]
    fn test_delete_key_removes_selection() {
        let rect = rect_at(0.0, 0.0);
        let mut adapter = adapter_with(&[&rect]);
        down(&mut adapter, 10.0, 10.0);
        up(&mut adapter, 10.0, 10.0);

        let commands = adapter.handle(CanvasEvent::Key {
            key: Key::Delete,
            modifiers: Modifiers::NONE,
        });
        assert_eq!(commands, vec![CanvasCommand::Delete(rect.id().clone())]);
        assert!(adapter.drawables().is_empty());
        assert!(adapter.selected().is_none());

        // Nothing selected: nothing to delete.
        assert!(adapter.handle(CanvasEvent::DeleteSelected).is_empty());
    }

    #[test]
    fn test_reset_clears_everything() {
        let a = rect_at(0.0, 0.0);
        let b = rect_at(100.0, 0.0);
        let mut adapter = adapter_with(&[&a, &b]);
        adapter.handle(CanvasEvent::ToolSelected(ToolKind::Line));
        down(&mut adapter, 300.0, 300.0);

        assert_eq!(adapter.handle(CanvasEvent::Reset), vec![CanvasCommand::DeleteAll]);
        assert!(adapter.drawables().is_empty());
        assert_eq!(adapter.state(), GestureState::Idle);
    }

    #[test]
    fn test_history_shortcuts() {
        let mut adapter = CanvasAdapter::default();
        assert_eq!(
            adapter.handle(shortcut('z', Modifiers::ctrl())),
            vec![CanvasCommand::Undo]
        );
        assert_eq!(
            adapter.handle(shortcut('z', Modifiers::ctrl_shift())),
            vec![CanvasCommand::Redo]
        );
        assert_eq!(
            adapter.handle(shortcut('y', Modifiers::ctrl())),
            vec![CanvasCommand::Redo]
        );
        assert!(adapter.handle(shortcut('z', Modifiers::NONE)).is_empty());
    }

    #[test]
    fn test_copy_paste_offsets_new_copy() {
        let rect = rect_at(0.0, 0.0);
        let mut adapter = adapter_with(&[&rect]);
        down(&mut adapter, 10.0, 10.0);
        up(&mut adapter, 10.0, 10.0);

        assert!(adapter.handle(shortcut('c', Modifiers::ctrl())).is_empty());
        let commands = adapter.handle(shortcut('v', Modifiers::ctrl()));
        let [CanvasCommand::Commit(copy)] = commands.as_slice() else {
            panic!("expected a commit, got {commands:?}");
        };
        assert_ne!(copy.id(), rect.id());
        assert_eq!(copy.bounds().origin(), Point::new(10.0, 10.0));
        assert_eq!(adapter.selected(), Some(copy.id()));

        let commands = adapter.handle(shortcut('v', Modifiers::ctrl()));
        let [CanvasCommand::Commit(second)] = commands.as_slice() else {
            panic!("expected a commit, got {commands:?}");
        };
        assert_eq!(second.bounds().origin(), Point::new(20.0, 20.0));
        assert_eq!(adapter.drawables().len(), 3);
    }

    #[test]
    fn test_attribute_edits() {
        let text = Shape::Text(Text::new(Point::new(0.0, 0.0), "hi".to_string()));
        let rect = rect_at(200.0, 200.0);
        let mut adapter = adapter_with(&[&text, &rect]);
        down(&mut adapter, 210.0, 210.0);
        up(&mut adapter, 210.0, 210.0);

        // Font size does not apply to a rectangle.
        assert!(adapter
            .handle(CanvasEvent::AttributeEdited(AttributeEdit::FontSize(20.0)))
            .is_empty());

        let commands = adapter.handle(CanvasEvent::AttributeEdited(AttributeEdit::Width(80.0)));
        assert!(matches!(commands.as_slice(), [CanvasCommand::Commit(_)]));
        let attrs = adapter.selected_attributes().unwrap();
        assert!((attrs.width - 80.0).abs() < 1e-9);
        assert_eq!(attrs.font_size, None);

        let red = SerializableColor::new(255, 0, 0, 255);
        adapter.handle(CanvasEvent::AttributeEdited(AttributeEdit::Fill(Some(red))));
        assert_eq!(adapter.selected_attributes().unwrap().fill, Some(red));
    }

    #[test]
    fn test_non_finite_attribute_edits_ignored() {
        let rect = rect_at(200.0, 200.0);
        let mut adapter = adapter_with(&[&rect]);
        down(&mut adapter, 210.0, 210.0);
        up(&mut adapter, 210.0, 210.0);

        for edit in [
            AttributeEdit::StrokeWidth(f64::INFINITY),
            AttributeEdit::Opacity(f64::NAN),
            AttributeEdit::Width(f64::NAN),
            AttributeEdit::Height(f64::INFINITY),
        ] {
            assert!(adapter.handle(CanvasEvent::AttributeEdited(edit)).is_empty());
        }
        let shape = adapter.selected_shape().unwrap();
        assert!(codec::serialize(shape).is_ok());

        // Nothing selected: the tool style is left alone too.
        adapter.handle(CanvasEvent::PointerDown(Point::new(900.0, 900.0)));
        assert!(adapter.selected().is_none());
        let before = adapter.tools.current_style.stroke_width;
        adapter.handle(CanvasEvent::AttributeEdited(AttributeEdit::StrokeWidth(f64::INFINITY)));
        assert_eq!(adapter.tools.current_style.stroke_width, before);
    }

    #[test]
    fn test_text_edit_and_style_for_next_shape() {
        let mut adapter = CanvasAdapter::default();
        let blue = SerializableColor::new(0, 0, 255, 255);
        adapter.handle(CanvasEvent::AttributeEdited(AttributeEdit::Stroke(blue)));

        adapter.handle(CanvasEvent::ToolSelected(ToolKind::Text));
        down(&mut adapter, 0.0, 0.0);
        let commands = up(&mut adapter, 0.0, 0.0);
        let [CanvasCommand::Commit(text)] = commands.as_slice() else {
            panic!("expected a commit, got {commands:?}");
        };
        assert_eq!(text.style().stroke, blue);
        adapter.mark_committed(text.id());

        down(&mut adapter, 5.0, 5.0);
        up(&mut adapter, 5.0, 5.0);
        let commands = adapter.handle(CanvasEvent::TextEdited("Hello".to_string()));
        let [CanvasCommand::Commit(edited)] = commands.as_slice() else {
            panic!("expected a commit, got {commands:?}");
        };
        assert_eq!(edited.as_text().unwrap().content, "Hello");
        assert!(adapter.handle(CanvasEvent::TextEdited("Hello".to_string())).is_empty());
    }

    #[test]
    fn test_image_upload() {
        let mut adapter = CanvasAdapter::default();
        let png = b"\x89PNG\r\n\x1a\n0000".to_vec();
        let commands = adapter.handle(CanvasEvent::ImageSelected(ImageUpload {
            bytes: png,
            width: 800,
            height: 400,
            position: None,
        }));
        let [CanvasCommand::Commit(Shape::Image(image))] = commands.as_slice() else {
            panic!("expected an image commit, got {commands:?}");
        };
        assert!((image.width - 200.0).abs() < f64::EPSILON);
        assert!((image.height - 100.0).abs() < f64::EPSILON);
        assert!(image.src.starts_with("data:image/png;base64,"));
        assert_eq!(adapter.selected(), Some(&image.id));

        let rejected = adapter.handle(CanvasEvent::ImageSelected(ImageUpload {
            bytes: b"GIF89a".to_vec(),
            width: 1,
            height: 1,
            position: None,
        }));
        assert!(rejected.is_empty());
    }

    #[test]
    fn test_remote_removal_clears_selection() {
        let rect = rect_at(0.0, 0.0);
        let mut adapter = adapter_with(&[&rect]);
        down(&mut adapter, 10.0, 10.0);

        let report = adapter.apply_document(&Document::new());
        assert_eq!(report.removed, vec![rect.id().clone()]);
        assert!(adapter.selected().is_none());
        assert_eq!(adapter.state(), GestureState::Idle);
        assert!(adapter.presence().editing.is_none());
    }

    #[test]
    fn test_presence_tracks_cursor_and_chat() {
        let mut adapter = CanvasAdapter::default();
        assert_eq!(adapter.presence().cursor_color.as_deref(), Some("#dc2626"));

        adapter.handle(CanvasEvent::PointerMove(Point::new(3.0, 4.0)));
        assert_eq!(adapter.presence().cursor, Some(Point::new(3.0, 4.0)));
        adapter.handle(CanvasEvent::PointerLeft);
        assert_eq!(adapter.presence().cursor, None);

        adapter.handle(CanvasEvent::ChatMessage(Some("hello".to_string())));
        assert_eq!(adapter.presence().message.as_deref(), Some("hello"));
    }

    #[test]
    fn test_layers_in_z_order() {
        let text = Shape::Text(Text::new(Point::new(0.0, 0.0), "a".to_string()));
        let rect = rect_at(0.0, 0.0);
        let mut adapter = CanvasAdapter::default();
        let mut set = DrawableSet::new();
        set.insert(Drawable::committed(text.clone()));
        set.insert(Drawable::committed(rect.clone()));
        adapter.drawables = set;

        assert_eq!(
            adapter.layers(),
            vec![(text.id().clone(), "text"), (rect.id().clone(), "rectangle")]
        );
    }
}
