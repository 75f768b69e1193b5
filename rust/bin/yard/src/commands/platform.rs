//! Platform and piece commands.

use anyhow::Result;
use yard_inventory::{InventoryEngine, NewPiece, NewPlatform, Platform, PlatformPatch};

fn sync_label(p: &Platform) -> &'static str {
    if p.identity.is_provisional() {
        "provisional"
    } else if p.needs_sync {
        "needs-sync"
    } else {
        "synced"
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn list(engine: &InventoryEngine, json: bool) -> Result<()> {
    let platforms = engine.list();
    if json {
        return print_json(&platforms);
    }
    if platforms.is_empty() {
        println!("No platforms.");
        return Ok(());
    }

    println!(
        "{:34} {:22} {:12} {:>7} {:>10} {:>10} {:12}",
        "ID", "NUMBER", "STATUS", "PIECES", "LENGTH", "LINEAR M", "SYNC"
    );
    for p in &platforms {
        println!(
            "{:34} {:22} {:12} {:>7} {:>10.3} {:>10.3} {:12}",
            p.id(),
            p.business_number(),
            p.status.to_string(),
            p.pieces.len(),
            p.total_length,
            p.total_linear_meters,
            sync_label(p)
        );
    }
    Ok(())
}

pub fn show(engine: &InventoryEngine, id: &str, json: bool) -> Result<()> {
    let Some(p) = engine.get(id) else {
        anyhow::bail!("Platform \"{}\" not found.", id);
    };
    if json {
        return print_json(&p);
    }

    println!("Platform {} ({})", p.business_number(), p.id());
    println!("  Provider:  {}", p.provider);
    println!("  Driver:    {}", p.driver);
    println!("  Received:  {}", p.reception_date);
    println!("  Materials: {}", p.material_types.join(", "));
    println!("  Width:     {:.3}", p.standard_width);
    println!("  Status:    {}", p.status);
    println!("  Sync:      {}", sync_label(&p));
    if let Some(notes) = &p.notes {
        println!("  Notes:     {}", notes);
    }
    println!();
    println!("{:>4} {:34} {:>8} {:>8} {:>10} {:16}", "#", "PIECE", "LENGTH", "WIDTH", "LINEAR M", "MATERIAL");
    for piece in &p.pieces {
        println!(
            "{:>4} {:34} {:>8.3} {:>8.3} {:>10.3} {:16}",
            piece.sequence_number,
            piece.id,
            piece.length,
            piece.standard_width,
            piece.linear_meters,
            piece.material
        );
    }
    println!("{:>4} {:34} {:>8.3} {:>8} {:>10.3}", "", "TOTAL", p.total_length, "", p.total_linear_meters);
    Ok(())
}

/// Create from a JSON body shaped like [`NewPlatform`].
pub async fn create(engine: &InventoryEngine, body: &str) -> Result<()> {
    let attrs: NewPlatform = serde_json::from_str(body)?;
    let p = engine.create_platform(attrs).await?;
    println!("Created platform {} ({}), {}.", p.business_number(), p.id(), sync_label(&p));
    Ok(())
}

/// Apply a JSON body shaped like [`PlatformPatch`].
pub async fn update(engine: &InventoryEngine, id: &str, body: &str) -> Result<()> {
    let patch: PlatformPatch = serde_json::from_str(body)?;
    let p = engine.update_platform(id, patch).await?;
    println!("Updated platform {}, {}.", p.id(), sync_label(&p));
    Ok(())
}

pub async fn add_pieces(
    engine: &InventoryEngine,
    id: &str,
    lengths: &[f64],
    material: Option<&str>,
) -> Result<()> {
    let drafts = lengths
        .iter()
        .map(|&length| NewPiece {
            length,
            material: material.map(str::to_string),
        })
        .collect();
    let added = engine.add_pieces(id, drafts).await?;
    for piece in &added {
        println!(
            "Added piece #{} ({:.3} m, {:.3} linear m).",
            piece.sequence_number, piece.length, piece.linear_meters
        );
    }
    Ok(())
}

pub async fn delete_piece(engine: &InventoryEngine, id: &str, piece_id: &str) -> Result<()> {
    let p = engine.delete_piece(id, piece_id).await?;
    println!("Piece removed, {} left.", p.pieces.len());
    Ok(())
}

pub async fn set_width(engine: &InventoryEngine, id: &str, width: f64) -> Result<()> {
    let p = engine.change_standard_width(id, width).await?;
    println!(
        "Width set to {:.3}; total linear meters now {:.3}.",
        p.standard_width, p.total_linear_meters
    );
    Ok(())
}

pub async fn delete(engine: &InventoryEngine, id: &str) -> Result<()> {
    engine.delete_platform(id).await?;
    println!("Platform \"{}\" deleted.", id);
    Ok(())
}
