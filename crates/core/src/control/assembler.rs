//! Control-file assembly in the engine's fixed pathway order

use super::pathway::{Pathway, PathwayBlock, ProtocolError, Stage};

/// Ordered, validated set of pathway blocks for one engine invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlFile {
    stage: Stage,
    blocks: Vec<PathwayBlock>,
}

impl ControlFile {
    /// Arrange `blocks` in the stage's pathway order
    ///
    /// Blocks may be supplied in any order; each pathway of the stage must
    /// appear exactly once.
    ///
    /// # Errors
    /// Returns [`ProtocolError::WrongStage`] for a block of the other stage,
    /// [`ProtocolError::DuplicateBlock`] for a repeated pathway and
    /// [`ProtocolError::MissingBlock`] for an absent one.
    pub fn assemble(stage: Stage, blocks: Vec<PathwayBlock>) -> Result<Self, ProtocolError> {
        let order = stage.pathway_order();
        let mut slots: Vec<Option<PathwayBlock>> = vec![None; order.len()];

        for block in blocks {
            let pathway = block.pathway();
            let index = order
                .iter()
                .position(|p| *p == pathway)
                .ok_or(ProtocolError::WrongStage { pathway, stage })?;
            if slots[index].is_some() {
                return Err(ProtocolError::DuplicateBlock(pathway));
            }
            slots[index] = Some(block);
        }

        let blocks = slots
            .into_iter()
            .zip(order)
            .map(|(slot, pathway)| {
                slot.ok_or(ProtocolError::MissingBlock {
                    stage,
                    pathway: *pathway,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { stage, blocks })
    }

    /// Stage this file configures
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Block of a pathway
    #[must_use]
    pub fn block(&self, pathway: Pathway) -> Option<&PathwayBlock> {
        self.blocks.iter().find(|b| b.pathway() == pathway)
    }

    /// Blocks in engine order
    #[must_use]
    pub fn blocks(&self) -> &[PathwayBlock] {
        &self.blocks
    }

    /// Complete document: blocks separated by one blank line, ending in a newline
    #[must_use]
    pub fn render(&self) -> String {
        let mut text = self
            .blocks
            .iter()
            .map(PathwayBlock::render)
            .collect::<Vec<_>>()
            .join("\n\n");
        text.push('\n');
        text
    }
}
