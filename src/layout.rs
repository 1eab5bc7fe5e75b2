//! The extent-layout engine.  One pass assigns final logical block
//! numbers to every extent-bearing object and pushes them into every
//! stored cross-reference, leaving the model ready for emission in
//! ascending extent order.

use byteorder::ByteOrder;

use crate::codec::ceiling_div;
use crate::directory::DrId;
use crate::error::{Error, Result};
use crate::image::Image;
use crate::inode::LinkedRecord;
use crate::udf::FeId;

/// The first extent past the system area.
const FIRST_USABLE_EXTENT: u32 = 16;
/// Where the main UDF volume descriptor sequence starts.
const UDF_MAIN_VDS_EXTENT: u32 = 32;
/// Blocks reserved for each UDF volume descriptor sequence.
const UDF_VDS_EXTENT_COUNT: u32 = 16;
/// The fixed location of the first anchor.
const UDF_FIRST_ANCHOR_EXTENT: u32 = 256;

/// Assign a directory's extent, writing through to its own path table
/// record, its "." entry, and (root only) its ".." entry.  The ".."
/// entries of child directories were assigned when the parent ran.
fn assign_directory_extent(image: &mut Image, dir: DrId, extent: u32) {
    let parent_extent = match image.tree.get(dir).parent {
        // The root's ".." points back at the root itself.
        None => extent,
        Some(parent) => image.tree.get(parent).extent_location(),
    };
    image.tree.get_mut(dir).set_data_location(extent);
    let children = image.tree.get(dir).children.clone();
    if let Some(dot) = children.first() {
        image.tree.get_mut(*dot).set_data_location(extent);
    }
    if let Some(dotdot) = children.get(1) {
        image.tree.get_mut(*dotdot).set_data_location(parent_extent);
    }
}

fn assign_tree_extents(image: &mut Image, root: DrId, mut current: u32) -> u32 {
    for dir in image.tree.walk_directories(root) {
        assign_directory_extent(image, dir, current);
        let len = u64::from(image.tree.get(dir).data_length);
        current += ceiling_div(len, u64::from(image.block_size)) as u32;
    }
    current
}

/// Walk the UDF file-entry graph breadth-first, assigning each entry
/// its ICB extent and each directory its identifier-area extents.
fn assign_udf_metadata(image: &mut Image, part_start: u32, mut current: u32) -> Result<u32> {
    let udf = match image.udf.as_mut() {
        Some(udf) => udf,
        None => return Ok(current),
    };
    let root = match udf.root {
        Some(root) => root,
        None => return Ok(current),
    };
    let block_size = u64::from(image.block_size);

    let mut queue = std::collections::VecDeque::new();
    queue.push_back(root);
    while let Some(fe_id) = queue.pop_front() {
        let fe = &mut udf.files[fe_id.0];
        fe.set_extent_location(current, current - part_start);
        current += 1;

        if fe.is_dir() {
            // The identifier area follows the directory's file entry.
            let area_extents = ceiling_div(fe.info_len.max(1), block_size) as u32;
            fe.set_data_location(current - part_start);
            let rel_area_start = current - part_start;
            let mut offset = 0u64;
            for fid in &mut fe.fi_descs {
                let tag_extent = rel_area_start + (offset / block_size) as u32;
                fid.set_extent_location(part_start + tag_extent, tag_extent);
                offset += crate::udf::UdfFileIdentifierDescriptor::length(fid.fi.len()) as u64;
            }
            current += area_extents;

            // Child directories are assigned when they come off the
            // queue; files and symlinks get their ICB extents here.
            let children: Vec<FeId> = udf.files[fe_id.0]
                .fi_descs
                .iter()
                .filter(|fid| !fid.is_parent())
                .filter_map(|fid| fid.file_entry)
                .collect();
            for child in children {
                if udf.files[child.0].is_dir() {
                    queue.push_back(child);
                } else {
                    udf.files[child.0].set_extent_location(current, current - part_start);
                    current += 1;
                }
            }
        }
    }

    // Every file entry now has its final ICB location; point the file
    // identifiers (including the parent identifiers) at them.
    let fe_count = udf.files.len();
    for fe_index in 0..fe_count {
        let fe_id = FeId(fe_index);
        let parent = udf.files[fe_index].parent;
        let fid_count = udf.files[fe_index].fi_descs.len();
        for fid_index in 0..fid_count {
            let target = if udf.files[fe_index].fi_descs[fid_index].is_parent() {
                parent.unwrap_or(fe_id)
            } else {
                match udf.files[fe_index].fi_descs[fid_index].file_entry {
                    Some(target) => target,
                    None => continue,
                }
            };
            let abs = udf.files[target.0].extent_location();
            udf.files[fe_index].fi_descs[fid_index].set_icb(abs, abs - part_start);
        }
    }

    Ok(current)
}

/// Run the single layout pass described in the module docs: place the
/// volume descriptors, the UDF graph, the path tables, the directory
/// extents, the boot catalog, the continuation blocks, and the inodes,
/// then propagate every assignment into the stored cross-references.
pub fn reshuffle_extents(image: &mut Image) -> Result<()> {
    let block_size = u64::from(image.block_size);
    let mut current: u32 = FIRST_USABLE_EXTENT;

    // Volume descriptors, one extent each.
    image.pvd.set_extent_location(current);
    current += 1;
    for br in &mut image.brs {
        br.new_extent_loc = Some(current);
        current += 1;
    }
    for svd in &mut image.svds {
        svd.set_extent_location(current);
        current += 1;
    }
    for vdst in &mut image.vdsts {
        vdst.new_extent_loc = Some(current);
        current += 1;
    }
    if let Some(version_vd) = image.version_vd.as_mut() {
        version_vd.new_extent_loc = Some(current);
        current += 1;
    }

    // The UDF recognition area, descriptor sequences, and metadata
    // partition.
    let mut part_start: u32 = 0;
    let mut udf_vds_starts: Option<(u32, u32)> = None;
    if let Some(udf) = image.udf.as_mut() {
        if let Some(bea) = udf.bea.as_mut() {
            bea.new_extent_loc = Some(current);
            current += 1;
        }
        if let Some(nsr) = udf.nsr.as_mut() {
            nsr.new_extent_loc = Some(current);
            current += 1;
        }
        if let Some(tea) = udf.tea.as_mut() {
            tea.new_extent_loc = Some(current);
            current += 1;
        }
        if let Some(boot) = udf.boot_descriptor.as_mut() {
            boot.new_extent_loc = Some(current);
            current += 1;
        }

        let main_start = current.max(UDF_MAIN_VDS_EXTENT);
        udf.main_vds.assign_desc_extents(main_start);
        let reserve_start = main_start + UDF_VDS_EXTENT_COUNT;
        udf.reserve_vds.assign_desc_extents(reserve_start);
        udf_vds_starts = Some((main_start, reserve_start));
        current = reserve_start + UDF_VDS_EXTENT_COUNT;

        if let Some(lvid) = udf.lvid.as_mut() {
            lvid.set_extent_location(current);
            for lv in udf
                .main_vds
                .logical_volumes
                .iter_mut()
                .chain(udf.reserve_vds.logical_volumes.iter_mut())
            {
                lv.set_integrity_location(current);
            }
            current += 1;
            if let Some(term) = udf.lvid_terminator.as_mut() {
                term.set_extent_location(current, None);
                current += 1;
            }
        }

        if current > UDF_FIRST_ANCHOR_EXTENT {
            return Err(Error::internal("UDF descriptors overran the first anchor location"));
        }
        if let Some(anchor) = udf.anchors.first_mut() {
            anchor.set_extent_location(UDF_FIRST_ANCHOR_EXTENT, main_start, reserve_start);
        }
        current = UDF_FIRST_ANCHOR_EXTENT + 1;

        // The partition begins at the file set descriptor.
        part_start = current;
        for part in udf
            .main_vds
            .partitions
            .iter_mut()
            .chain(udf.reserve_vds.partitions.iter_mut())
        {
            part.set_start_location(part_start);
        }
        if let Some(fsd) = udf.fsd.as_mut() {
            fsd.set_extent_location(current, 0);
            current += 1;
        }
        if let Some(term) = udf.fsd_terminator.as_mut() {
            term.set_extent_location(current, Some(current - part_start));
            current += 1;
        }
        if udf.root.is_some() {
            if let Some(fsd) = udf.fsd.as_mut() {
                // The root ICB is the next thing assigned.
                fsd.root_dir_icb.set_extent_location(current, current - part_start);
            }
        }
    }
    current = assign_udf_metadata(image, part_start, current)?;

    // ISO path tables: the little-endian table, its padding, then the
    // big-endian copy.
    image.pvd.path_table_location_le = current;
    current += image.pvd.path_table_num_extents;
    image.pvd.path_table_location_be = current;
    current += image.pvd.path_table_num_extents;

    // The ISO directory tree, breadth-first.
    let iso_root = image.pvd.root_dir_record;
    current = assign_tree_extents(image, iso_root, current);

    // The Joliet tree, if present: its path tables, then its
    // directories.
    if let Some(joliet) = image.joliet_svd {
        image.svds[joliet].path_table_location_le = current;
        current += image.svds[joliet].path_table_num_extents;
        image.svds[joliet].path_table_location_be = current;
        current += image.svds[joliet].path_table_num_extents;
        let joliet_root = image.svds[joliet].root_dir_record;
        current = assign_tree_extents(image, joliet_root, current);
    }

    // The El Torito boot catalog.
    if image.eltorito.is_some() {
        let catalog_extent = current;
        current += 1;
        if let Some(br_index) = image.eltorito_br {
            let mut extent_bytes = [0u8; 4];
            byteorder::LittleEndian::write_u32(&mut extent_bytes, catalog_extent);
            image.brs[br_index].update_boot_system_use(&extent_bytes);
        }
        let dirrecords = image
            .eltorito
            .as_ref()
            .map(|cat| cat.dirrecords.clone())
            .unwrap_or_default();
        for rec in dirrecords {
            match rec {
                LinkedRecord::IsoDir(dr) | LinkedRecord::JolietDir(dr) => {
                    image.tree.get_mut(dr).set_data_location(catalog_extent);
                }
                LinkedRecord::UdfFile(fe) => {
                    if let Some(udf) = image.udf.as_mut() {
                        udf.files[fe.0].set_data_location(catalog_extent - part_start);
                    }
                }
                LinkedRecord::Eltorito(_) => {}
            }
        }
    }

    // Rock Ridge continuation blocks, then the CE records that point
    // into them.
    for block in &mut image.pvd.rr_ce_blocks {
        block.set_extent_location(Some(current));
        current += 1;
    }
    for index in 0..image.tree.len() {
        let dr = image.tree.get_mut(DrId(index));
        if let Some(rr) = dr.rock_ridge.as_mut() {
            if let (Some(ce), Some(block_index)) = (rr.dr_entries.ce_record.as_mut(), rr.ce_block) {
                let extent = image.pvd.rr_ce_blocks[block_index]
                    .extent_location()
                    .ok_or_else(|| Error::internal("continuation block extent missing"))?;
                ce.bl_cont_area = extent;
            }
        }
    }

    // Inodes, in stable id order, each claiming a contiguous run.
    // Orphaned inodes (every metadata reference removed) get nothing.
    for inode_index in 0..image.inodes.len() {
        if image.inodes[inode_index].linked_records.is_empty() {
            continue;
        }
        let extents = {
            let inode = &mut image.inodes[inode_index];
            inode.set_extent_location(current);
            ceiling_div(inode.data_length, block_size) as u32
        };
        let linked = image.inodes[inode_index].linked_records.clone();
        for rec in linked {
            match rec {
                LinkedRecord::IsoDir(dr) | LinkedRecord::JolietDir(dr) => {
                    image.tree.get_mut(dr).set_data_location(current);
                }
                LinkedRecord::UdfFile(fe) => {
                    if let Some(udf) = image.udf.as_mut() {
                        udf.files[fe.0].set_data_location(current - part_start);
                    }
                }
                LinkedRecord::Eltorito(entry_ref) => {
                    if let Some(catalog) = image.eltorito.as_mut() {
                        if let Some(entry) = catalog.entry_mut(entry_ref) {
                            entry.set_data_location(current);
                        }
                    }
                }
            }
        }
        current += extents;
    }

    // Rock Ridge child and parent links copy the live records' final
    // extents.
    for index in 0..image.tree.len() {
        let (cl_target, pl_target) = {
            let dr = image.tree.get(DrId(index));
            match dr.rock_ridge.as_ref() {
                Some(rr) => (rr.cl_to_moved, rr.parent_link),
                None => (None, None),
            }
        };
        if let Some(target) = cl_target {
            let extent = image.tree.get(target).extent_location();
            if let Some(rr) = image.tree.get_mut(DrId(index)).rock_ridge.as_mut() {
                rr.set_child_link_extent(extent)?;
            }
        }
        if let Some(target) = pl_target {
            let extent = image.tree.get(target).extent_location();
            if let Some(rr) = image.tree.get_mut(DrId(index)).rock_ridge.as_mut() {
                rr.set_parent_link_extent(extent)?;
            }
        }
    }

    // The trailing anchor sits on the image's final extent, outside
    // the partition.
    if let Some(udf) = image.udf.as_mut() {
        let partition_end = current;
        if let Some((main_start, reserve_start)) = udf_vds_starts {
            for anchor in udf.anchors.iter_mut().skip(1) {
                anchor.set_extent_location(current, main_start, reserve_start);
            }
            if udf.anchors.len() > 1 {
                current += 1;
            }
        }

        // Reconcile the partition length and integrity counters with
        // the final size.
        let part_length = partition_end - part_start;
        for part in udf
            .main_vds
            .partitions
            .iter_mut()
            .chain(udf.reserve_vds.partitions.iter_mut())
        {
            part.part_length = part_length;
        }
        let num_dirs = udf.files.iter().filter(|fe| fe.is_dir()).count() as u32;
        let num_files = udf.files.iter().filter(|fe| !fe.is_dir()).count() as u32;
        if let Some(lvid) = udf.lvid.as_mut() {
            lvid.size_tables = vec![part_length];
            lvid.free_space_tables = vec![0];
            lvid.logical_volume_impl_use.num_dirs = num_dirs;
            lvid.logical_volume_impl_use.num_files = num_files;
            if let Some(max_unique) = udf.files.iter().map(|fe| fe.unique_id).max() {
                lvid.logical_volume_contents_use.unique_id = max_unique + 1;
            }
        }
    }

    // The space size is authoritative: the highest extent used plus
    // one.  Joliet tables are sized independently; only the space size
    // is shared.
    image.pvd.space_size = current;
    for svd in &mut image.svds {
        svd.space_size = current;
    }

    Ok(())
}
