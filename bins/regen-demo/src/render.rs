// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Stand-in for a graphics context: global state behind apply-on-change stacks.

use std::cell::Cell;
use std::rc::Rc;

use regen_state::{IndexedValueStack, ValueStack};
use tracing::trace;

/// Framebuffer blend configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlendMode {
    Opaque,
    Alpha,
    Additive,
}

/// Per-draw-buffer channel write mask.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColorMask {
    pub r: bool,
    pub g: bool,
    pub b: bool,
    pub a: bool,
}

impl ColorMask {
    pub const ALL: Self = Self {
        r: true,
        g: true,
        b: true,
        a: true,
    };
    pub const RGB: Self = Self {
        r: true,
        g: true,
        b: true,
        a: false,
    };
}

/// Draw buffers of the fake G-buffer.
pub const DRAW_BUFFERS: usize = 4;

type Apply<V> = Box<dyn FnMut(&V)>;
type ApplyIndexed<V> = Box<dyn FnMut(usize, &V)>;

/// Render context handed to every render hook.
pub struct RenderContext {
    pub blend: ValueStack<BlendMode, Apply<BlendMode>>,
    pub masks: IndexedValueStack<ColorMask, Apply<ColorMask>, ApplyIndexed<ColorMask>>,
    /// Draw calls issued this run.
    pub draws: u64,
    transitions: Rc<Cell<u64>>,
}

impl RenderContext {
    pub fn new() -> Self {
        let transitions = Rc::new(Cell::new(0));
        let count = |counter: &Rc<Cell<u64>>| {
            let counter = Rc::clone(counter);
            move || counter.set(counter.get() + 1)
        };

        let on_blend = count(&transitions);
        let on_mask_all = count(&transitions);
        let on_mask_one = count(&transitions);

        let apply_blend: Apply<BlendMode> = Box::new(move |mode: &BlendMode| {
            trace!(?mode, "blend");
            on_blend();
        });
        let apply_masks: Apply<ColorMask> = Box::new(move |mask: &ColorMask| {
            trace!(?mask, "color mask (all)");
            on_mask_all();
        });
        let apply_mask: ApplyIndexed<ColorMask> = Box::new(move |i: usize, mask: &ColorMask| {
            trace!(buffer = i, ?mask, "color mask");
            on_mask_one();
        });
        Self {
            blend: ValueStack::new(apply_blend),
            masks: IndexedValueStack::new(DRAW_BUFFERS, apply_masks, apply_mask),
            draws: 0,
            transitions,
        }
    }

    /// Global state transitions actually issued.
    pub fn transitions(&self) -> u64 {
        self.transitions.get()
    }
}

impl Default for RenderContext {
    fn default() -> Self {
        Self::new()
    }
}
