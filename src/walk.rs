//! Walk Module for Zenith Runtime
//!
//! One phase walk over a page. The walker owns the active path as a stack of
//! frames; a hook on frame `f` sees the frames below it as its binding scope,
//! so bindings can read and write the parent chain while the hook runs.
//!
//! Per occurrence the walk is: next element id, acquire the instance, awake,
//! push a level, run the phase hook, walk the content (once per iteration),
//! pop the level, sleep, release. Every coordinate comes from the cursor, so
//! all three phases of an exchange assign the same ids to the same nodes.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::binding::{Frame, Lease, Scope};
use crate::component::{Component, Iterations, Phase, PhaseContext, PhaseOutput};
use crate::element_id::{ElementIdCursor, ElementIdPath};
use crate::error::{RuntimeError, RuntimeResult};
use crate::page::Page;
use crate::reference::ComponentReference;
use crate::request::Environment;
use crate::template::TemplateNode;

pub(crate) struct TreeWalker<'e> {
    env: &'e Environment,
    page: &'e mut Page,
    cursor: &'e mut dyn ElementIdCursor,
    phase: Phase,
    target: Option<ElementIdPath>,
    frames: Vec<Frame>,
    output: PhaseOutput,
    /// Set once the target action has run.
    finished: bool,
    /// Stateful element ids reached by this walk.
    visited: HashSet<ElementIdPath>,
}

impl<'e> TreeWalker<'e> {
    pub(crate) fn new(
        env: &'e Environment,
        page: &'e mut Page,
        cursor: &'e mut dyn ElementIdCursor,
        phase: Phase,
        target: Option<ElementIdPath>,
    ) -> Self {
        TreeWalker {
            env,
            page,
            cursor,
            phase,
            target,
            frames: Vec::new(),
            output: PhaseOutput::default(),
            finished: false,
            visited: HashSet::new(),
        }
    }

    /// Walks the whole page. The root and every stateful instance are back
    /// in the page when this returns, whatever the outcome.
    #[instrument(skip(self), fields(page = self.page.id(), phase = %self.phase))]
    pub(crate) fn run(mut self) -> (RuntimeResult<()>, PhaseOutput) {
        self.cursor.reset();
        let root = match self.page.take_root() {
            Ok(root) => root,
            Err(e) => return (Err(e), self.output),
        };
        self.frames.push(Frame {
            instance: root,
            definition: self.page.definition().clone(),
            reference: None,
            context: None,
            element_id: ElementIdPath::root(),
            lease: Lease::Root,
        });

        let result = self
            .visit(None)
            .map_err(|e| e.wrap_at(format!("page <{}>", self.page.name())));

        let mut release = Ok(());
        while let Some(frame) = self.frames.pop() {
            let released = self.release(frame);
            if release.is_ok() {
                release = released;
            }
        }
        let result = result.and(release);
        if result.is_ok() && self.phase == Phase::Render && !self.output.retry {
            self.page.retain_stateful(&self.visited);
        }
        (result, self.output)
    }

    fn stopped(&self) -> bool {
        self.finished || self.output.retry
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // OCCURRENCES
    // ═══════════════════════════════════════════════════════════════════════════

    fn walk_reference(&mut self, reference: &Arc<ComponentReference>, context: usize) -> RuntimeResult<()> {
        let id = self.cursor.next_path();
        if let (Phase::InvokeAction, Some(target)) = (self.phase, &self.target) {
            if !id.is_prefix_of(target) {
                return Ok(());
            }
        }

        let acquired = self.acquire(reference, &id);
        let (instance, lease) = match acquired {
            Ok(Some(acquired)) => acquired,
            Ok(None) => return Ok(()),
            Err(e) => return Err(e.wrap_at(format!("{} at {}", reference.location(), id))),
        };
        self.frames.push(Frame {
            instance,
            definition: reference.definition().clone(),
            reference: Some(reference.clone()),
            context: Some(context),
            element_id: id.clone(),
            lease,
        });

        let result = self.visit(Some(&id));
        let released = match self.frames.pop() {
            Some(frame) => self.release(frame),
            None => Err(RuntimeError::UnbalancedNesting("frame stack emptied".into())),
        };
        result
            .and(released)
            .map_err(|e| e.wrap_at(format!("{} at {}", reference.location(), id)))
    }

    /// Runs the node on top of the frame stack. `id` is `None` for the root.
    fn visit(&mut self, id: Option<&ElementIdPath>) -> RuntimeResult<()> {
        let f = self.frames.len() - 1;
        self.frames[f].instance.awake();
        if id.is_some() {
            self.cursor.push_level();
        }
        let result = self.visit_body(f, id);
        let popped = if id.is_some() {
            self.cursor.pop_level()
        } else {
            Ok(())
        };
        self.frames[f].instance.sleep();
        result.and(popped)
    }

    fn visit_body(&mut self, f: usize, id: Option<&ElementIdPath>) -> RuntimeResult<()> {
        match self.phase {
            Phase::ApplyValues => self.hook(f, |c, ctx| c.apply_values(ctx))?,
            Phase::Render => self.hook(f, |c, ctx| c.render(ctx))?,
            Phase::InvokeAction => {
                let is_target = matches!((id, &self.target), (Some(id), Some(target)) if id == target);
                if is_target {
                    let result = self.hook(f, |c, ctx| c.invoke_action(ctx))?;
                    debug!(sender = %self.frames[f].element_id, result = ?result, "invoked action");
                    self.output.action_result = result;
                    self.finished = true;
                    return Ok(());
                }
            }
        }
        if self.stopped() {
            return Ok(());
        }

        match self.hook(f, |c, ctx| c.iterations(ctx))? {
            Iterations::Skip => {}
            Iterations::Once => self.walk_template(f)?,
            Iterations::Repeat(count) => {
                for index in 0..count {
                    self.cursor.next_path();
                    self.cursor.push_level();
                    let result = self
                        .hook(f, |c, ctx| c.prepare_iteration(index, ctx))
                        .and_then(|()| self.walk_template(f));
                    let popped = self.cursor.pop_level();
                    result.and(popped)?;
                    if self.stopped() {
                        break;
                    }
                }
            }
        }

        if self.phase == Phase::Render && !self.stopped() {
            self.hook(f, |c, ctx| c.render_end(ctx))?;
        }
        Ok(())
    }

    /// Walks the template of the definition at frame `f`, evaluated against `f`.
    fn walk_template(&mut self, f: usize) -> RuntimeResult<()> {
        let template = self.frames[f].definition.template(self.env.app())?;
        self.walk_nodes(template.nodes(), f)
    }

    fn walk_nodes(&mut self, nodes: &[TemplateNode], context: usize) -> RuntimeResult<()> {
        for node in nodes {
            if self.stopped() {
                break;
            }
            match node {
                TemplateNode::Text(text) => {
                    if self.phase == Phase::Render {
                        self.output.content.push_str(text);
                    }
                }
                TemplateNode::Component(reference) => self.walk_reference(reference, context)?,
                TemplateNode::Content => {
                    // The body belongs to the template that declared the
                    // occurrence, so it evaluates against that frame.
                    let frame = &self.frames[context];
                    if let (Some(reference), Some(outer)) = (frame.reference.clone(), frame.context) {
                        self.walk_nodes(reference.body(), outer)?;
                    }
                }
            }
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // HOOKS
    // ═══════════════════════════════════════════════════════════════════════════

    fn hook<R, F>(&mut self, f: usize, call: F) -> RuntimeResult<R>
    where
        F: FnOnce(&mut dyn Component, &mut PhaseContext<'_>) -> RuntimeResult<R>,
    {
        let context = self.frames[f].context;
        let reference = self.frames[f].reference.clone();
        let element_id = self.frames[f].element_id.clone();
        let (lower, upper) = self.frames.split_at_mut(f);
        let scope_frames: &mut [Frame] = match context {
            Some(c) if c < lower.len() => &mut lower[..=c],
            _ => &mut lower[..0],
        };
        let mut ctx = PhaseContext {
            scope: Scope::new(scope_frames, self.env),
            reference: reference.as_deref(),
            element_id,
            phase: self.phase,
            output: &mut self.output,
        };
        call(upper[0].instance.as_mut(), &mut ctx)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ACQUISITION
    // ═══════════════════════════════════════════════════════════════════════════

    /// `Ok(None)` skips the subtree after a tolerated rendezvous failure.
    fn acquire(
        &mut self,
        reference: &Arc<ComponentReference>,
        id: &ElementIdPath,
    ) -> RuntimeResult<Option<(Box<dyn Component>, Lease)>> {
        let definition = reference.definition();
        if !definition.is_stateful() {
            return reference.acquire_stateless().map(Some);
        }

        self.visited.insert(id.clone());
        match self.page.take_stateful(id, definition) {
            Some(Ok(instance)) => Ok(Some((instance, Lease::Stateful(id.clone())))),
            Some(Err(_stale)) => {
                // Only pages rebound after a debug reload get here.
                warn!(component = %definition.name(), element_id = %id, "replacing stale stateful instance");
                Ok(Some((reference.create_stateful(), Lease::Stateful(id.clone()))))
            }
            None if self.phase == Phase::InvokeAction => {
                if self.env.request().allow_failed_rendezvous {
                    warn!(component = %definition.name(), element_id = %id, "tolerated rendezvous failure");
                    Ok(None)
                } else {
                    Err(RuntimeError::Rendezvous {
                        path: id.clone(),
                        component: definition.name().to_string(),
                    })
                }
            }
            None => {
                debug!(component = %definition.name(), element_id = %id, "created stateful instance");
                Ok(Some((reference.create_stateful(), Lease::Stateful(id.clone()))))
            }
        }
    }

    fn release(&mut self, frame: Frame) -> RuntimeResult<()> {
        let Frame {
            instance,
            definition,
            reference,
            lease,
            ..
        } = frame;
        match &lease {
            Lease::Root => {
                self.page.restore_root(instance);
                Ok(())
            }
            Lease::Stateful(path) => {
                self.page.insert_stateful(path.clone(), &definition, instance);
                Ok(())
            }
            Lease::Pooled | Lease::Shared => match reference {
                Some(reference) => reference.release_stateless(instance, &lease),
                None => Ok(()),
            },
            Lease::Transient | Lease::Detached => Ok(()),
        }
    }
}
