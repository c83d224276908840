//! Clip layer streams and drill hits to the board-outline bounding box.
//!
//! Draws that leave the box are replaced by their clipped sub-segment;
//! draws fully outside are dropped. Flashes and drill hits are dropped when
//! outside (closed-boundary point test). Moves are never emitted directly:
//! the walk re-synthesizes a move whenever a surviving draw does not start
//! at the last written position, which makes the operation idempotent.

use crate::{Job, LayerToken, OpKind};

impl Job {
    /// Clip every Gerber layer stream to the outline bounding box.
    pub fn trim_gerber(&mut self) {
        let bounds = self.bounding_box();
        let mut clipped_total = 0usize;
        for tokens in self.layers.values_mut() {
            let before = tokens.len();
            let mut out = Vec::with_capacity(before);
            // Logical pen position (follows the input stream) vs the pen
            // position as written so far.
            let mut pen: Option<(f64, f64)> = None;
            let mut written: Option<(f64, f64)> = None;
            for token in tokens.drain(..) {
                match token {
                    LayerToken::Select(_) | LayerToken::Passthrough(_) => out.push(token),
                    LayerToken::Op { x, y, kind: OpKind::Move } => {
                        pen = Some((x, y));
                    }
                    LayerToken::Op { x, y, kind: OpKind::Flash } => {
                        if bounds.contains(x, y) {
                            out.push(LayerToken::Op { x, y, kind: OpKind::Flash });
                            written = Some((x, y));
                        }
                        pen = Some((x, y));
                    }
                    LayerToken::Op { x, y, kind: OpKind::Line } => {
                        let start = pen.unwrap_or((x, y));
                        if let Some((a, b)) = bounds.clip_segment(start, (x, y)) {
                            if written != Some(a) {
                                out.push(LayerToken::Op { x: a.0, y: a.1, kind: OpKind::Move });
                            }
                            out.push(LayerToken::Op { x: b.0, y: b.1, kind: OpKind::Line });
                            written = Some(b);
                        }
                        pen = Some((x, y));
                    }
                }
            }
            // Clipping can also add synthesized moves, so this only counts
            // net removals.
            clipped_total += before.saturating_sub(out.len());
            *tokens = out;
        }
        if clipped_total > 0 {
            tracing::debug!(target: "job.trim", job = %self.name, removed = clipped_total, "trim_gerber");
        }
    }

    /// Drop drill hits outside the outline bounding box.
    pub fn trim_excellon(&mut self) {
        let bounds = self.bounding_box();
        let mut removed = 0usize;
        for hits in self.drill.hits.values_mut() {
            let before = hits.len();
            hits.retain(|&(x, y)| bounds.contains(x, y));
            removed += before - hits.len();
        }
        if removed > 0 {
            tracing::debug!(target: "job.trim", job = %self.name, removed, "trim_excellon");
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::testutil::rect_job;
    use crate::{LayerToken, OpKind};

    #[test]
    fn trim_drops_outside_flashes_and_clips_draws() {
        let mut job = rect_job("j", 4.0, 3.0);
        {
            let copper = job.layers.get_mut("*toplayer").unwrap();
            // Flash outside the board.
            copper.push(LayerToken::Op { x: 6.0, y: 1.0, kind: OpKind::Flash });
            // Draw crossing the right edge.
            copper.push(LayerToken::Op { x: 3.0, y: 1.0, kind: OpKind::Move });
            copper.push(LayerToken::Op { x: 6.0, y: 1.0, kind: OpKind::Line });
            // Draw entirely outside.
            copper.push(LayerToken::Op { x: 5.0, y: 5.0, kind: OpKind::Move });
            copper.push(LayerToken::Op { x: 6.0, y: 6.0, kind: OpKind::Line });
        }
        job.trim_gerber();
        let copper = &job.layers["*toplayer"];
        assert!(copper.contains(&LayerToken::Op { x: 3.0, y: 1.0, kind: OpKind::Move }));
        assert!(copper.contains(&LayerToken::Op { x: 4.0, y: 1.0, kind: OpKind::Line }));
        assert!(!copper.iter().any(|t| matches!(
            t,
            LayerToken::Op { x, .. } if *x > 4.0
        )));
    }

    #[test]
    fn trim_gerber_is_idempotent() {
        let mut job = rect_job("j", 4.0, 3.0);
        {
            let copper = job.layers.get_mut("*toplayer").unwrap();
            copper.push(LayerToken::Op { x: -1.0, y: 1.0, kind: OpKind::Move });
            copper.push(LayerToken::Op { x: 5.0, y: 1.0, kind: OpKind::Line });
        }
        job.trim_gerber();
        let once = job.layers["*toplayer"].clone();
        job.trim_gerber();
        assert_eq!(once, job.layers["*toplayer"]);
    }

    #[test]
    fn trim_excellon_keeps_boundary_hits() {
        let mut job = rect_job("j", 2.0, 2.0);
        job.drill
            .hits
            .get_mut("T01")
            .unwrap()
            .extend([(2.0, 2.0), (2.1, 1.0)]);
        job.trim_excellon();
        let hits = &job.drill.hits["T01"];
        assert_eq!(hits.len(), 2);
        assert!(hits.contains(&(2.0, 2.0)));
        assert!(!hits.contains(&(2.1, 1.0)));
    }
}
